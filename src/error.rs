//! Error types for simsql.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Every failure surfaces to the scripting side as a single descriptive value; the
//! variant tells the caller which layer (settings, connection, statement, session)
//! rejected the call.

use serde::Serialize;
use thiserror::Error;

/// Why a settings list was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigErrorKind {
    UnknownKey,
    MissingKey,
    InvalidValue,
}

impl std::fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKey => write!(f, "unknown key"),
            Self::MissingKey => write!(f, "missing key"),
            Self::InvalidValue => write!(f, "invalid value"),
        }
    }
}

/// Why a connection could not be established or loaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    DriverUnavailable,
    AuthFailed,
    Unreachable,
    PoolExhausted,
}

impl std::fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DriverUnavailable => write!(f, "driver unavailable"),
            Self::AuthFailed => write!(f, "authentication failed"),
            Self::Unreachable => write!(f, "server unreachable"),
            Self::PoolExhausted => write!(f, "pool exhausted"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SqlError {
    #[error("Configuration error ({kind}) for '{key}': {message}")]
    Configuration {
        kind: ConfigErrorKind,
        key: String,
        message: String,
    },

    #[error("Connection failed ({kind}): {message}")]
    Connection {
        kind: ConnectionErrorKind,
        message: String,
        suggestion: String,
    },

    #[error("Statement failed: {message}")]
    Statement {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("No active connection for context {context}")]
    NoActiveConnection { context: String },

    #[error("Unsupported column type {type_name} in column '{column}'")]
    UnsupportedColumnType { column: String, type_name: String },

    #[error("Unknown database brand: {brand}")]
    UnknownBrand { brand: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SqlError {
    /// Create a configuration error.
    pub fn configuration(
        kind: ConfigErrorKind,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            kind,
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn unknown_key(key: impl Into<String>) -> Self {
        let key = key.into();
        let message = format!("'{}' is not a recognized setting", key);
        Self::configuration(ConfigErrorKind::UnknownKey, key, message)
    }

    pub fn missing_key(key: impl Into<String>) -> Self {
        let key = key.into();
        let message = format!("'{}' must be provided", key);
        Self::configuration(ConfigErrorKind::MissingKey, key, message)
    }

    pub fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::configuration(ConfigErrorKind::InvalidValue, key, message)
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(
        kind: ConnectionErrorKind,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Connection {
            kind,
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(max_connections: u32) -> Self {
        Self::connection(
            ConnectionErrorKind::PoolExhausted,
            format!("all {} pooled connections are in use", max_connections),
            "Disconnect idle contexts or raise maxconnections",
        )
    }

    /// Create a statement error with optional SQL state.
    pub fn statement(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Statement {
            message: message.into(),
            sql_state,
        }
    }

    pub fn no_active_connection(context: impl std::fmt::Display) -> Self {
        Self::NoActiveConnection {
            context: context.to_string(),
        }
    }

    pub fn unsupported_column(column: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::UnsupportedColumnType {
            column: column.into(),
            type_name: type_name.into(),
        }
    }

    pub fn unknown_brand(brand: impl Into<String>) -> Self {
        Self::UnknownBrand {
            brand: brand.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::NoActiveConnection { .. } => {
                Some("Call connect, or set-connection-pooling before executing statements")
            }
            _ => None,
        }
    }

    /// Short, stable name of the error category, used in script replies.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Connection { .. } => "connection",
            Self::Statement { .. } => "statement",
            Self::NoActiveConnection { .. } => "no_active_connection",
            Self::UnsupportedColumnType { .. } => "unsupported_column_type",
            Self::UnknownBrand { .. } => "unknown_brand",
            Self::Internal { .. } => "internal",
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection {
                kind: ConnectionErrorKind::Unreachable | ConnectionErrorKind::PoolExhausted,
                ..
            }
        )
    }
}

/// Convert sqlx errors raised after a connection is open.
///
/// Connect-time failures are classified separately by the driver, which knows
/// whether the error happened during the handshake.
impl From<sqlx::Error> for SqlError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                SqlError::statement(db_err.message(), code)
            }
            sqlx::Error::Configuration(msg) => SqlError::connection(
                ConnectionErrorKind::DriverUnavailable,
                msg.to_string(),
                "Check the brand and connection settings",
            ),
            sqlx::Error::Io(io_err) => SqlError::connection(
                ConnectionErrorKind::Unreachable,
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => SqlError::connection(
                ConnectionErrorKind::Unreachable,
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => SqlError::connection(
                ConnectionErrorKind::Unreachable,
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                SqlError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => SqlError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => SqlError::internal("Database worker crashed"),
            _ => SqlError::statement(format!("Database error: {}", err), None),
        }
    }
}

/// Result type alias for simsql operations.
pub type SqlResult<T> = Result<T, SqlError>;
