//! Configuration handling for simsql.
//!
//! This module provides configuration management via CLI arguments and environment variables.

use crate::error::SqlResult;
use crate::models::SettingsLayer;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOG_LEVEL: &str = "info";

// Pooling policy defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_AUTO_DISCONNECT: bool = true;

/// Configuration for the simsql script runner.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "simsql",
    about = "SQL session layer for scripted simulations - runs JSON-lines scripts against SQL databases",
    version,
    author
)]
pub struct Config {
    /// Script file to run (JSON lines). Reads stdin when omitted.
    #[arg(short, long, value_name = "FILE", env = "SIMSQL_SCRIPT")]
    pub script: Option<PathBuf>,

    /// Default connection setting applied beneath every connect.
    /// Format: "key=value". Can be specified multiple times.
    #[arg(
        short = 'D',
        long = "default",
        value_name = "KEY=VALUE",
        env = "SIMSQL_DEFAULTS",
        value_delimiter = ','
    )]
    pub defaults: Vec<String>,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "SIMSQL_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "SIMSQL_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SIMSQL_JSON_LOGS")]
    pub json_logs: bool,

    /// Enable logging output on stderr
    #[arg(long, env = "SIMSQL_ENABLE_LOGS")]
    pub enable_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get connect timeout as Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Parse the `--default` assignments into a settings layer.
    pub fn settings_defaults(&self) -> SqlResult<SettingsLayer> {
        SettingsLayer::parse_assignments(&self.defaults)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            script: None,
            defaults: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
            enable_logs: false,
        }
    }
}
