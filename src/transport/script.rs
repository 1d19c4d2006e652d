//! JSON-lines script protocol.
//!
//! Each input line is one request naming the calling context and the
//! primitive to run:
//!
//! ```text
//! {"context": "agent-1", "call": "connect", "settings": [["host", "localhost"], ["brand", "mysql"]]}
//! {"context": "agent-1", "call": "exec-query", "sql": "SELECT id FROM agents"}
//! {"context": "agent-1", "call": "fetch-row"}
//! ```
//!
//! Each request yields exactly one reply line, `{"ok": <value>}` or
//! `{"error": {"kind": ..., "message": ...}}`. Blank lines are skipped and a
//! malformed line gets an error reply without stopping the script.

use crate::db::driver::Driver;
use crate::environment::Environment;
use crate::error::{SqlError, SqlResult};
use crate::models::{ContextId, Setting};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// One script line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptRequest {
    pub context: ContextId,
    #[serde(flatten)]
    pub call: Call,
}

/// A primitive and its arguments.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "call", rename_all = "kebab-case")]
pub enum Call {
    Connect {
        settings: Vec<Setting>,
    },
    Disconnect,
    SetConnectionPooling {
        settings: Vec<Setting>,
    },
    ExecDirect {
        sql: String,
    },
    ExecQuery {
        sql: String,
    },
    ExecUpdate {
        sql: String,
    },
    FetchRow,
    #[serde(rename = "resultset-available?")]
    ResultsetAvailable,
    ShowVersion,
    UseDatabase {
        name: String,
    },
    CurrentDatabase,
    FindDatabase {
        name: String,
    },
    Teardown,
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::Connect { .. } => "connect",
            Call::Disconnect => "disconnect",
            Call::SetConnectionPooling { .. } => "set-connection-pooling",
            Call::ExecDirect { .. } => "exec-direct",
            Call::ExecQuery { .. } => "exec-query",
            Call::ExecUpdate { .. } => "exec-update",
            Call::FetchRow => "fetch-row",
            Call::ResultsetAvailable => "resultset-available?",
            Call::ShowVersion => "show-version",
            Call::UseDatabase { .. } => "use-database",
            Call::CurrentDatabase => "current-database",
            Call::FindDatabase { .. } => "find-database",
            Call::Teardown => "teardown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReply {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// One reply line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ok(serde_json::Value),
    Error(ErrorReply),
}

impl Reply {
    fn malformed(err: serde_json::Error) -> Self {
        Reply::Error(ErrorReply {
            kind: "malformed_request".to_string(),
            message: err.to_string(),
            suggestion: Some(
                "Each line must be a JSON object with \"context\" and \"call\" fields".to_string(),
            ),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl From<SqlError> for Reply {
    fn from(err: SqlError) -> Self {
        Reply::Error(ErrorReply {
            kind: err.kind_name().to_string(),
            message: err.to_string(),
            suggestion: err.suggestion().map(str::to_string),
        })
    }
}

/// Counters for a finished script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptSummary {
    pub requests: usize,
    pub errors: usize,
}

fn to_json<T: Serialize>(value: T) -> SqlResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| SqlError::internal(format!("Failed to encode reply: {}", e)))
}

/// Run one request against the environment.
pub async fn dispatch<D: Driver>(env: &Environment<D>, request: ScriptRequest) -> Reply {
    let context = &request.context;
    debug!(context = %context, call = request.call.name(), "Dispatching script call");

    let result = match request.call {
        Call::Connect { settings } => env.connect(context, &settings).await.and_then(to_json),
        Call::Disconnect => env.disconnect(context).await.and_then(to_json),
        Call::SetConnectionPooling { settings } => env
            .set_connection_pooling(context, &settings)
            .await
            .and_then(to_json),
        Call::ExecDirect { sql } => env.exec_direct(context, &sql).await.and_then(to_json),
        Call::ExecQuery { sql } => env.exec_query(context, &sql).await.and_then(to_json),
        Call::ExecUpdate { sql } => env.exec_update(context, &sql).await.and_then(to_json),
        Call::FetchRow => env.fetch_row(context).await.and_then(to_json),
        Call::ResultsetAvailable => to_json(env.resultset_available(context).await),
        Call::ShowVersion => to_json(env.show_version()),
        Call::UseDatabase { name } => env.use_database(context, &name).await.and_then(to_json),
        Call::CurrentDatabase => env.current_database(context).await.and_then(to_json),
        Call::FindDatabase { name } => env.find_database(context, &name).await.and_then(to_json),
        Call::Teardown => env.teardown(context).await.and_then(to_json),
    };

    match result {
        Ok(value) => Reply::Ok(value),
        Err(e) => {
            warn!(context = %context, error = %e, "Script call failed");
            Reply::from(e)
        }
    }
}

/// Read requests from `reader` until end of input, writing one reply line per
/// request to `writer`.
pub async fn run_script<D, R, W>(
    env: &Environment<D>,
    reader: R,
    mut writer: W,
) -> SqlResult<ScriptSummary>
where
    D: Driver,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut summary = ScriptSummary::default();

    while let Some(line) = lines.next_line().await.map_err(io_error)? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<ScriptRequest>(line) {
            Ok(request) => dispatch(env, request).await,
            Err(e) => {
                warn!(error = %e, "Malformed script line");
                Reply::malformed(e)
            }
        };

        summary.requests += 1;
        if reply.is_error() {
            summary.errors += 1;
        }

        let mut out = serde_json::to_string(&reply)
            .map_err(|e| SqlError::internal(format!("Failed to encode reply: {}", e)))?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await.map_err(io_error)?;
        writer.flush().await.map_err(io_error)?;
    }

    info!(
        requests = summary.requests,
        errors = summary.errors,
        "Script finished"
    );
    Ok(summary)
}

fn io_error(err: std::io::Error) -> SqlError {
    SqlError::internal(format!("Script I/O error: {}", err))
}
