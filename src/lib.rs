//! simsql Library
//!
//! This library provides the SQL session layer for scripted simulations: each
//! execution context (for example one simulated agent) can bind a connection to
//! MySQL, PostgreSQL or SQLite, share pooled connections with other contexts,
//! and read results one row at a time.

pub mod config;
pub mod db;
pub mod environment;
pub mod error;
pub mod models;
pub mod transport;

pub use config::Config;
pub use environment::Environment;
pub use error::{SqlError, SqlResult};
