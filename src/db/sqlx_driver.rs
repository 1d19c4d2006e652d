//! Production driver backed by `sqlx`.
//!
//! Uses database-specific connection types (MySqlConnection, PgConnection,
//! SqliteConnection) rather than `AnyConnection` to keep full type support when
//! decoding values. Statements are sent as plain text, so schema switches and
//! other session statements behave exactly as typed.

use crate::db::dialect::{Brand, Dialect};
use crate::db::driver::{Driver, NativeConnection, Outcome, RowSource, StatementKind};
use crate::db::types::{self, column_metadata};
use crate::error::{ConnectionErrorKind, SqlError, SqlResult};
use crate::models::{ColumnMeta, Value};
use futures_util::TryStreamExt;
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ConnectOptions, Connection, Either, Executor};
use std::collections::VecDeque;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::config::DEFAULT_CONNECT_TIMEOUT_SECS;

/// Opens native connections through sqlx.
#[derive(Debug, Clone)]
pub struct SqlxDriver {
    connect_timeout: Duration,
}

impl SqlxDriver {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for SqlxDriver {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
    }
}

/// Database-specific native connection.
pub enum SqlxConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

impl SqlxConnection {
    pub fn brand(&self) -> Brand {
        impl_native_dispatch!(self, {
            MySql(_c) => Brand::MySql,
            Postgres(_c) => Brand::PostgreSql,
            Sqlite(_c) => Brand::Sqlite,
        })
    }
}

impl std::fmt::Debug for SqlxConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SqlxConnection").field(&self.brand()).finish()
    }
}

impl Driver for SqlxDriver {
    type Connection = SqlxConnection;

    fn name(&self) -> &'static str {
        "sqlx"
    }

    async fn connect(&self, dialect: &'static Dialect, url: &str) -> SqlResult<SqlxConnection> {
        let attempt = async {
            match dialect.brand {
                Brand::MySql => MySqlConnection::connect(url)
                    .await
                    .map(SqlxConnection::MySql),
                Brand::PostgreSql => PgConnection::connect(url)
                    .await
                    .map(SqlxConnection::Postgres),
                Brand::Sqlite => match SqliteConnectOptions::from_str(url) {
                    Ok(options) => options
                        .create_if_missing(true)
                        .connect()
                        .await
                        .map(SqlxConnection::Sqlite),
                    Err(e) => Err(e),
                },
            }
        };

        match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(Ok(conn)) => {
                debug!(brand = %dialect.brand, "Opened sqlx connection");
                Ok(conn)
            }
            Ok(Err(e)) => Err(classify_connect_error(dialect, e)),
            Err(_) => Err(SqlError::connection(
                ConnectionErrorKind::Unreachable,
                format!(
                    "timed out after {}s connecting to {}",
                    self.connect_timeout.as_secs(),
                    dialect.name
                ),
                "Check that the server is running and reachable, or raise --connect-timeout",
            )),
        }
    }
}

/// Classify an error raised while opening a connection.
fn classify_connect_error(dialect: &Dialect, err: sqlx::Error) -> SqlError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string());
            match code.as_deref() {
                Some("28000") | Some("28P01") => SqlError::connection(
                    ConnectionErrorKind::AuthFailed,
                    db_err.message().to_string(),
                    "Check the user and password settings",
                ),
                _ => SqlError::connection(
                    ConnectionErrorKind::Unreachable,
                    db_err.message().to_string(),
                    format!("Check that the schema exists on the {} server", dialect.name),
                ),
            }
        }
        sqlx::Error::Configuration(msg) => SqlError::connection(
            ConnectionErrorKind::DriverUnavailable,
            msg.to_string(),
            format!("Check the settings used to build the {} URL", dialect.name),
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
        other => SqlError::connection(
            ConnectionErrorKind::Unreachable,
            other.to_string(),
            "Check network connectivity and database server status",
        ),
    }
}

/// Column metadata of a statement that produced no rows. Empty when the
/// statement has no result columns or cannot be described.
macro_rules! describe_columns {
    ($conn:expr, $sql:expr) => {{
        match (&mut *$conn).describe($sql).await {
            Ok(described) => types::described_metadata(described.columns()),
            Err(e) => {
                debug!(error = %e, "Statement could not be described");
                Vec::new()
            }
        }
    }};
}

/// Run one statement on a native connection and buffer its outcome.
macro_rules! run_statement {
    ($conn:expr, $sql:expr, $kind:expr, $variant:ident) => {{
        let conn = $conn;
        match $kind {
            StatementKind::Update => {
                let result = (&mut *conn).execute($sql).await?;
                Ok(Outcome::Affected(result.rows_affected()))
            }
            StatementKind::Query => {
                let rows: VecDeque<_> = (&mut *conn).fetch_all($sql).await?.into();
                if rows.is_empty() {
                    let columns = describe_columns!(conn, $sql);
                    Ok(Outcome::Rows(SqlxRows::with_columns(columns, NativeRows::$variant(rows))))
                } else {
                    Ok(Outcome::Rows(SqlxRows::new(NativeRows::$variant(rows))))
                }
            }
            StatementKind::Direct => {
                let mut rows = VecDeque::new();
                let mut affected = 0;
                {
                    let mut stream = (&mut *conn).fetch_many($sql);
                    while let Some(step) = stream.try_next().await? {
                        match step {
                            Either::Left(done) => affected += done.rows_affected(),
                            Either::Right(row) => rows.push_back(row),
                        }
                    }
                }
                if rows.is_empty() {
                    // A row-returning statement that matched nothing still has columns.
                    let columns = describe_columns!(conn, $sql);
                    if columns.is_empty() {
                        Ok(Outcome::Affected(affected))
                    } else {
                        Ok(Outcome::Rows(SqlxRows::with_columns(columns, NativeRows::$variant(rows))))
                    }
                } else {
                    Ok(Outcome::Rows(SqlxRows::new(NativeRows::$variant(rows))))
                }
            }
        }
    }};
}

/// Run a single-column lookup, binding `arg` when present.
macro_rules! lookup_text {
    ($conn:expr, $sql:expr, $arg:expr) => {{
        let mut query = sqlx::query_scalar::<_, Option<String>>($sql);
        if let Some(arg) = $arg {
            query = query.bind(arg);
        }
        Ok(query.fetch_optional(&mut *$conn).await?.flatten())
    }};
}

impl NativeConnection for SqlxConnection {
    type Rows = SqlxRows;

    async fn execute(&mut self, sql: &str, kind: StatementKind) -> SqlResult<Outcome<SqlxRows>> {
        impl_native_dispatch!(self, {
            MySql(c) => run_statement!(c, sql, kind, MySql),
            Postgres(c) => run_statement!(c, sql, kind, Postgres),
            Sqlite(c) => run_statement!(c, sql, kind, Sqlite),
        })
    }

    async fn query_text(&mut self, sql: &str, arg: Option<&str>) -> SqlResult<Option<String>> {
        impl_native_dispatch!(self, {
            MySql(c) => lookup_text!(c, sql, arg),
            Postgres(c) => lookup_text!(c, sql, arg),
            Sqlite(c) => lookup_text!(c, sql, arg),
        })
    }

    async fn close(self) -> SqlResult<()> {
        let brand = self.brand();
        let result = impl_native_dispatch!(self, {
            MySql(c) => c.close().await,
            Postgres(c) => c.close().await,
            Sqlite(c) => c.close().await,
        });
        debug!(brand = %brand, "Closed sqlx connection");
        result.map_err(SqlError::from)
    }
}

enum NativeRows {
    MySql(VecDeque<MySqlRow>),
    Postgres(VecDeque<PgRow>),
    Sqlite(VecDeque<SqliteRow>),
}

/// Buffered rows of one statement, decoded as they are read.
pub struct SqlxRows {
    columns: Vec<ColumnMeta>,
    rows: NativeRows,
}

impl SqlxRows {
    fn new(rows: NativeRows) -> Self {
        let columns = match &rows {
            NativeRows::MySql(r) => r.front().map(column_metadata),
            NativeRows::Postgres(r) => r.front().map(column_metadata),
            NativeRows::Sqlite(r) => r.front().map(column_metadata),
        }
        .unwrap_or_default();
        Self { columns, rows }
    }

    fn with_columns(columns: Vec<ColumnMeta>, rows: NativeRows) -> Self {
        Self { columns, rows }
    }

    fn remaining(&self) -> usize {
        match &self.rows {
            NativeRows::MySql(r) => r.len(),
            NativeRows::Postgres(r) => r.len(),
            NativeRows::Sqlite(r) => r.len(),
        }
    }
}

impl RowSource for SqlxRows {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn next_row(&mut self) -> Option<SqlResult<Vec<Value>>> {
        let columns = &self.columns;
        match &mut self.rows {
            NativeRows::MySql(r) => r
                .pop_front()
                .map(|row| types::mysql::decode_row(&row, columns)),
            NativeRows::Postgres(r) => r
                .pop_front()
                .map(|row| types::postgres::decode_row(&row, columns)),
            NativeRows::Sqlite(r) => r
                .pop_front()
                .map(|row| types::sqlite::decode_row(&row, columns)),
        }
    }

    fn close(&mut self) {
        match &mut self.rows {
            NativeRows::MySql(r) => r.clear(),
            NativeRows::Postgres(r) => r.clear(),
            NativeRows::Sqlite(r) => r.clear(),
        }
    }
}

impl std::fmt::Debug for SqlxRows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxRows")
            .field("columns", &self.columns)
            .field("remaining", &self.remaining())
            .finish()
    }
}
