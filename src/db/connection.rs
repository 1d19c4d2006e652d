//! A native connection bound to one execution context.

use crate::db::cursor::ResultCursor;
use crate::db::dialect::Dialect;
use crate::db::driver::{Driver, DriverRows, NativeConnection, Outcome, StatementKind};
use crate::db::pool::Fingerprint;
use crate::error::{SqlError, SqlResult};
use crate::models::{ColumnMeta, ConnectionConfig, ContextId, Value};
use serde::Serialize;
use tracing::{debug, info};

/// Result of executing a statement on a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Execution {
    /// A cursor is now open over rows with these columns.
    Rows { columns: Vec<ColumnMeta> },
    Affected(u64),
}

/// Native connection plus the per-connection session state: at most one open
/// cursor, and where the connection came from.
pub struct Connection<D: Driver> {
    id: String,
    context: ContextId,
    config: ConnectionConfig,
    native: D::Connection,
    cursor: Option<ResultCursor<DriverRows<D>>>,
    /// Set when the native connection is on loan from the pool.
    pooled: Option<Fingerprint>,
    /// The current schema differs from the one the connection was opened with.
    schema_switched: bool,
}

/// What is left of a connection once its session state is torn down.
pub struct Detached<C> {
    pub native: C,
    pub pooled: Option<Fingerprint>,
    pub schema_switched: bool,
}

impl<D: Driver> Connection<D> {
    pub fn new(
        context: ContextId,
        config: ConnectionConfig,
        native: D::Connection,
        pooled: Option<Fingerprint>,
    ) -> Self {
        let id = generate_connection_id();
        info!(
            connection_id = %id,
            context = %context,
            brand = %config.brand,
            url = %config.masked_url(),
            pooled = pooled.is_some(),
            "Connection bound"
        );
        Self {
            id,
            context,
            config,
            native,
            cursor: None,
            pooled,
            schema_switched: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &ContextId {
        &self.context
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn dialect(&self) -> &'static Dialect {
        self.config.dialect()
    }

    pub fn is_pooled(&self) -> bool {
        self.pooled.is_some()
    }

    pub fn pool_fingerprint(&self) -> Option<&Fingerprint> {
        self.pooled.as_ref()
    }

    /// Pooled and configured to go back to the pool once results are consumed.
    pub fn auto_disconnects(&self) -> bool {
        self.pooled.is_some() && self.config.auto_disconnect
    }

    /// Execute a statement, closing any open cursor first.
    pub async fn execute(&mut self, sql: &str, kind: StatementKind) -> SqlResult<Execution> {
        self.close_cursor();
        debug!(
            connection_id = %self.id,
            context = %self.context,
            kind = %kind,
            "Executing statement"
        );

        match self.native.execute(sql, kind).await? {
            Outcome::Rows(source) => {
                let cursor = ResultCursor::new(source);
                let columns = cursor.columns().to_vec();
                self.cursor = Some(cursor);
                Ok(Execution::Rows { columns })
            }
            Outcome::Affected(n) => Ok(Execution::Affected(n)),
        }
    }

    /// Next row of the open cursor; empty when there is none or it is drained.
    pub fn fetch_row(&mut self) -> SqlResult<Vec<Value>> {
        match self.cursor.as_mut() {
            Some(cursor) => cursor.fetch_row(),
            None => Ok(Vec::new()),
        }
    }

    /// An open cursor with rows possibly remaining.
    pub fn resultset_available(&self) -> bool {
        self.cursor.as_ref().is_some_and(|c| !c.is_exhausted())
    }

    /// A cursor was opened and has been read past its end.
    pub fn cursor_drained(&self) -> bool {
        self.cursor.as_ref().is_some_and(|c| c.is_exhausted())
    }

    pub fn close_cursor(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            cursor.close();
        }
    }

    /// Make `name` the current schema of this connection.
    pub async fn use_database(&mut self, name: &str) -> SqlResult<()> {
        let dialect = self.dialect();
        let sql = dialect.switch_schema_sql(name).ok_or_else(|| {
            SqlError::statement(
                format!("{} cannot switch schemas on an open connection", dialect.name),
                None,
            )
        })?;

        self.close_cursor();
        self.native.execute(&sql, StatementKind::Update).await?;

        if self.config.schema != name {
            self.config.schema = name.to_string();
            self.schema_switched = true;
        }
        info!(
            connection_id = %self.id,
            context = %self.context,
            schema = %name,
            "Switched schema"
        );
        Ok(())
    }

    /// The schema the server reports as current.
    pub async fn current_database(&mut self) -> SqlResult<String> {
        let sql = self.dialect().current_schema_sql;
        Ok(self.native.query_text(sql, None).await?.unwrap_or_default())
    }

    /// Whether a schema named `name` exists on the server.
    pub async fn find_database(&mut self, name: &str) -> SqlResult<bool> {
        let sql = self.dialect().schema_exists_sql;
        Ok(self.native.query_text(sql, Some(name)).await?.is_some())
    }

    /// Close the cursor and hand back the native connection.
    pub fn detach(mut self) -> Detached<D::Connection> {
        self.close_cursor();
        debug!(connection_id = %self.id, context = %self.context, "Connection detached");
        Detached {
            native: self.native,
            pooled: self.pooled,
            schema_switched: self.schema_switched,
        }
    }
}

impl<D: Driver> std::fmt::Debug for Connection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("url", &self.config.masked_url())
            .field("cursor", &self.cursor)
            .field("pooled", &self.pooled)
            .field("schema_switched", &self.schema_switched)
            .finish()
    }
}

/// Generate a unique connection ID.
fn generate_connection_id() -> String {
    format!("conn_{}", uuid::Uuid::new_v4().simple())
}
