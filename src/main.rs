//! simsql - Main entry point.
//!
//! Runs a JSON-lines simulation script against MySQL, PostgreSQL or SQLite,
//! one bound connection per execution context.

use simsql::config::Config;
use simsql::db::SqlxDriver;
use simsql::environment::Environment;
use simsql::transport::{StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Stdout carries script replies, so logs go to stderr and only when enabled.
fn init_tracing(config: &Config) {
    if !config.enable_logs {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();

    init_tracing(&config);

    let defaults = config.settings_defaults()?;
    info!(
        has_defaults = !defaults.is_empty(),
        connect_timeout = config.connect_timeout,
        "Starting simsql v{}",
        env!("CARGO_PKG_VERSION")
    );

    let driver = SqlxDriver::new(config.connect_timeout_duration());
    let env = Arc::new(Environment::new(driver, defaults));

    let transport = StdioTransport::new(env, config.script.clone());
    info!(transport = transport.name(), "Using transport");

    if let Err(e) = transport.run().await {
        error!(error = %e, "Script error");
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}
