//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Dialect registry
//! - Driver seam with sqlx and in-memory implementations
//! - Type mappings
//! - Database dispatch macros for reducing code duplication
//! - Connection pool keyed by configuration fingerprint
//! - Connections, row cursors and the per-context session registry

#[macro_use]
pub mod macros;
pub mod connection;
pub mod cursor;
pub mod dialect;
pub mod driver;
pub mod memory;
pub mod pool;
pub mod session;
pub mod sqlx_driver;
pub mod types;

pub use connection::{Connection, Execution};
pub use cursor::ResultCursor;
pub use dialect::{Brand, Dialect};
pub use driver::{Driver, NativeConnection, Outcome, RowSource, StatementKind};
pub use memory::{MemoryCell, MemoryDriver, MemoryResponse};
pub use pool::{ConnectionPool, Fingerprint, PoolStats};
pub use session::{BoundSession, SessionRegistry};
pub use sqlx_driver::{SqlxConnection, SqlxDriver};
