//! Data models for simsql.
//!
//! This module re-exports all model types used throughout the application.

pub mod context;
pub mod settings;
pub mod value;

// Re-export commonly used types
pub use context::ContextId;
pub use settings::{ConnectionConfig, Setting, SettingsLayer, SettingsMode, parse_settings};
pub use value::{ColumnMeta, Value};
