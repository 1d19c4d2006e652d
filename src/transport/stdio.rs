//! Stdio transport.
//!
//! Reads script requests from a file, or from stdin when no file is given,
//! and writes one reply line per request to stdout.

use crate::db::driver::Driver;
use crate::environment::Environment;
use crate::error::{SqlError, SqlResult};
use crate::transport::Transport;
use crate::transport::script::{ScriptSummary, run_script};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{info, warn};

pub struct StdioTransport<D: Driver> {
    env: Arc<Environment<D>>,
    script: Option<PathBuf>,
}

impl<D: Driver> StdioTransport<D> {
    /// Create a transport over `env`. With `script` set, requests are read
    /// from that file instead of stdin.
    pub fn new(env: Arc<Environment<D>>, script: Option<PathBuf>) -> Self {
        Self { env, script }
    }

    async fn run_input(&self) -> SqlResult<ScriptSummary> {
        let stdout = tokio::io::stdout();
        match &self.script {
            Some(path) => {
                info!(path = %path.display(), "Running script file");
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    SqlError::internal(format!("Cannot open script {}: {}", path.display(), e))
                })?;
                run_script(&self.env, BufReader::new(file), stdout).await
            }
            None => {
                info!("Reading script from stdin");
                run_script(&self.env, BufReader::new(tokio::io::stdin()), stdout).await
            }
        }
    }
}

impl<D: Driver> Transport for StdioTransport<D> {
    async fn run(&self) -> SqlResult<()> {
        let (result, shutdown_requested) = tokio::select! {
            result = self.run_input() => (result.map(|_| ()), false),
            _ = wait_for_signal() => {
                info!("Shutdown signal received (send again to force exit)");
                (Ok(()), true)
            }
        };

        if shutdown_requested {
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("Received second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        info!("Closing all database connections");
        self.env.shutdown().await;

        if shutdown_requested {
            // A pending stdin read cannot be interrupted, so leave directly.
            info!("Exiting process");
            std::process::exit(0);
        }

        result
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM). A handler that cannot be
/// installed never fires.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
