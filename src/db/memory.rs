//! In-memory driver.
//!
//! Answers statements from a table of scripted responses instead of a server,
//! and counts every native open and close. Used by the test suite and for dry
//! runs of simulation scripts where no database is available.
//!
//! Schema operations are emulated: the driver keeps a list of known schemas,
//! understands each dialect's switch statement, current-schema query and
//! schema-existence query, and tracks the current schema per connection.

use crate::db::dialect::Dialect;
use crate::db::driver::{Driver, NativeConnection, Outcome, RowSource, StatementKind};
use crate::error::{ConnectionErrorKind, SqlError, SqlResult};
use crate::models::{ColumnMeta, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// One cell of a scripted row.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryCell {
    Value(Value),
    Null,
    /// A value of a native type the session layer cannot represent; reading it
    /// fails with `UnsupportedColumnType`.
    Opaque(String),
}

impl From<Value> for MemoryCell {
    fn from(value: Value) -> Self {
        MemoryCell::Value(value)
    }
}

/// Scripted reply to a statement.
#[derive(Debug, Clone)]
pub enum MemoryResponse {
    Rows {
        columns: Vec<ColumnMeta>,
        rows: Vec<Vec<MemoryCell>>,
    },
    Affected(u64),
    Fail {
        message: String,
        sql_state: Option<String>,
    },
    /// The link drops while the statement runs. The connection fails every
    /// later statement too.
    Disconnect,
}

impl MemoryResponse {
    /// Rows built from plain values.
    pub fn rows(columns: &[(&str, &str)], rows: Vec<Vec<Value>>) -> Self {
        MemoryResponse::Rows {
            columns: columns
                .iter()
                .map(|(name, type_name)| ColumnMeta::new(*name, *type_name))
                .collect(),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(MemoryCell::Value).collect())
                .collect(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        MemoryResponse::Fail {
            message: message.into(),
            sql_state: None,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    opened: AtomicUsize,
    closed: AtomicUsize,
    fail_close: AtomicBool,
    connect_failure: Mutex<Option<ConnectionErrorKind>>,
    responses: Mutex<HashMap<String, MemoryResponse>>,
    schemas: Mutex<Vec<String>>,
    urls: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted in-process driver. Clones share state, so a test can keep a
/// handle for assertions after moving the driver into an environment.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    state: Arc<MemoryState>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the reply for an exact statement text.
    pub fn respond(&self, sql: impl Into<String>, response: MemoryResponse) -> &Self {
        lock(&self.state.responses).insert(sql.into().trim().to_string(), response);
        self
    }

    /// Schemas that exist on the emulated server.
    pub fn with_schemas<I, S>(self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.state.schemas).extend(schemas.into_iter().map(Into::into));
        self
    }

    /// Make subsequent connects fail with the given kind (None to recover).
    pub fn fail_connect(&self, kind: Option<ConnectionErrorKind>) {
        *lock(&self.state.connect_failure) = kind;
    }

    /// Make native close calls report an error (the close still counts).
    pub fn fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::Release);
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::Acquire)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Connections opened and not yet closed.
    pub fn live(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }

    /// URLs passed to connect, in order.
    pub fn urls(&self) -> Vec<String> {
        lock(&self.state.urls).clone()
    }

    /// Statements passed to execute, in order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.state.executed).clone()
    }
}

impl Driver for MemoryDriver {
    type Connection = MemoryConnection;

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self, dialect: &'static Dialect, url: &str) -> SqlResult<MemoryConnection> {
        if let Some(kind) = *lock(&self.state.connect_failure) {
            return Err(SqlError::connection(
                kind,
                format!("scripted connect failure for {}", dialect.name),
                "Clear the scripted failure",
            ));
        }

        let id = self.state.opened.fetch_add(1, Ordering::AcqRel) + 1;
        lock(&self.state.urls).push(url.to_string());

        let schema = if dialect.is_networked() {
            url.rsplit('/').next().unwrap_or_default()
        } else {
            url.strip_prefix("sqlite:").unwrap_or(url)
        };

        debug!(memory_connection = id, schema = %schema, "Opened memory connection");
        Ok(MemoryConnection {
            id,
            dialect,
            state: Arc::clone(&self.state),
            schema: schema.to_string(),
            broken: false,
        })
    }
}

/// Connection handed out by [`MemoryDriver`].
pub struct MemoryConnection {
    id: usize,
    dialect: &'static Dialect,
    state: Arc<MemoryState>,
    schema: String,
    broken: bool,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("brand", &self.dialect.brand)
            .field("schema", &self.schema)
            .field("broken", &self.broken)
            .finish()
    }
}

impl MemoryConnection {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn current_schema(&self) -> &str {
        &self.schema
    }

    fn link_lost(&self) -> SqlError {
        SqlError::connection(
            ConnectionErrorKind::Unreachable,
            format!("memory connection {} lost its link", self.id),
            "Reconnect to continue",
        )
    }

    fn switch_target(&self, sql: &str) -> Option<String> {
        lock(&self.state.schemas)
            .iter()
            .find(|s| self.dialect.switch_schema_sql(s).as_deref() == Some(sql))
            .cloned()
    }
}

impl NativeConnection for MemoryConnection {
    type Rows = MemoryRows;

    async fn execute(&mut self, sql: &str, kind: StatementKind) -> SqlResult<Outcome<MemoryRows>> {
        let sql = sql.trim();
        lock(&self.state.executed).push(sql.to_string());
        if self.broken {
            return Err(self.link_lost());
        }

        if let Some(schema) = self.switch_target(sql) {
            self.schema = schema;
            return Ok(Outcome::Affected(0));
        }

        let response = lock(&self.state.responses).get(sql).cloned();
        match (response, kind) {
            (Some(MemoryResponse::Fail { message, sql_state }), _) => {
                Err(SqlError::statement(message, sql_state))
            }
            (Some(MemoryResponse::Disconnect), _) => {
                self.broken = true;
                Err(self.link_lost())
            }
            (Some(MemoryResponse::Rows { .. }), StatementKind::Update) => Ok(Outcome::Affected(0)),
            (Some(MemoryResponse::Rows { columns, rows }), _) => {
                Ok(Outcome::Rows(MemoryRows::new(columns, rows)))
            }
            (Some(MemoryResponse::Affected(_)) | None, StatementKind::Query) => {
                Ok(Outcome::Rows(MemoryRows::new(Vec::new(), Vec::new())))
            }
            (Some(MemoryResponse::Affected(n)), _) => Ok(Outcome::Affected(n)),
            (None, _) => Ok(Outcome::Affected(0)),
        }
    }

    async fn query_text(&mut self, sql: &str, arg: Option<&str>) -> SqlResult<Option<String>> {
        if self.broken {
            return Err(self.link_lost());
        }
        if sql == self.dialect.current_schema_sql {
            return Ok(Some(self.schema.clone()));
        }
        if sql == self.dialect.schema_exists_sql {
            let known = lock(&self.state.schemas);
            return Ok(arg.and_then(|name| known.iter().find(|s| *s == name).cloned()));
        }
        match lock(&self.state.responses).get(sql.trim()) {
            Some(MemoryResponse::Rows { rows, .. }) => Ok(rows
                .first()
                .and_then(|row| row.first())
                .and_then(|cell| match cell {
                    MemoryCell::Value(v) => v.as_text(),
                    _ => None,
                })),
            Some(MemoryResponse::Fail { message, sql_state }) => {
                Err(SqlError::statement(message.clone(), sql_state.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn close(self) -> SqlResult<()> {
        self.state.closed.fetch_add(1, Ordering::AcqRel);
        debug!(memory_connection = self.id, "Closed memory connection");
        if self.state.fail_close.load(Ordering::Acquire) {
            return Err(SqlError::internal(format!(
                "scripted close failure for memory connection {}",
                self.id
            )));
        }
        Ok(())
    }
}

/// Row source over scripted rows.
#[derive(Debug)]
pub struct MemoryRows {
    columns: Vec<ColumnMeta>,
    rows: VecDeque<Vec<MemoryCell>>,
    closed: bool,
}

impl MemoryRows {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Vec<MemoryCell>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl RowSource for MemoryRows {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn next_row(&mut self) -> Option<SqlResult<Vec<Value>>> {
        if self.closed {
            return None;
        }
        let row = self.rows.pop_front()?;
        let decoded = row
            .into_iter()
            .enumerate()
            .map(|(idx, cell)| match cell {
                MemoryCell::Value(v) => Ok(v),
                MemoryCell::Null => Ok(Value::null()),
                MemoryCell::Opaque(type_name) => {
                    let column = self
                        .columns
                        .get(idx)
                        .map(|c| c.name.clone())
                        .unwrap_or_else(|| idx.to_string());
                    Err(SqlError::unsupported_column(column, type_name))
                }
            })
            .collect();
        Some(decoded)
    }

    fn close(&mut self) {
        self.closed = true;
        self.rows.clear();
    }
}
