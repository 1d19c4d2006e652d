//! Native driver abstraction.
//!
//! The session layer never talks to a database directly. It delegates to a
//! [`Driver`], which opens [`NativeConnection`]s, which in turn produce
//! [`RowSource`]s for statements that return rows. Two implementations ship
//! with the crate:
//!
//! - [`SqlxDriver`](super::sqlx_driver::SqlxDriver): MySQL, PostgreSQL and SQLite via `sqlx`
//! - [`MemoryDriver`](super::memory::MemoryDriver): scripted, in-process responses

use crate::db::dialect::Dialect;
use crate::error::SqlResult;
use crate::models::{ColumnMeta, Value};
use std::future::Future;

/// How a statement is executed and what the caller expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Run as-is; yields a cursor only if the statement produced rows.
    Direct,
    /// Always yields a cursor, possibly empty.
    Query,
    /// Yields an affected-row count and never a cursor.
    Update,
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Query => write!(f, "query"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// What a native statement execution produced.
pub enum Outcome<R> {
    Rows(R),
    Affected(u64),
}

impl<R> std::fmt::Debug for Outcome<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Rows(_) => f.write_str("Rows"),
            Outcome::Affected(n) => f.debug_tuple("Affected").field(n).finish(),
        }
    }
}

/// Forward-only source of rows for one statement.
///
/// Values are decoded on demand, so a column the caller cannot represent only
/// fails when the row containing it is read.
pub trait RowSource: Send + 'static {
    fn columns(&self) -> &[ColumnMeta];

    /// Next decoded row, or `None` once the source is drained.
    fn next_row(&mut self) -> Option<SqlResult<Vec<Value>>>;

    /// Release native result resources. Called once, at exhaustion or when
    /// the cursor is superseded.
    fn close(&mut self);
}

/// An open native connection.
pub trait NativeConnection: Send + 'static {
    type Rows: RowSource;

    fn execute(
        &mut self,
        sql: &str,
        kind: StatementKind,
    ) -> impl Future<Output = SqlResult<Outcome<Self::Rows>>> + Send;

    /// Run a single-column query and return the first value as text, binding
    /// `arg` as the only parameter when given.
    fn query_text(
        &mut self,
        sql: &str,
        arg: Option<&str>,
    ) -> impl Future<Output = SqlResult<Option<String>>> + Send;

    fn close(self) -> impl Future<Output = SqlResult<()>> + Send;
}

/// Factory for native connections.
pub trait Driver: Send + Sync + 'static {
    type Connection: NativeConnection;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn connect(
        &self,
        dialect: &'static Dialect,
        url: &str,
    ) -> impl Future<Output = SqlResult<Self::Connection>> + Send;
}

/// Rows produced by a driver's connections.
pub type DriverRows<D> = <<D as Driver>::Connection as NativeConnection>::Rows;
