//! Transport layer for the simulation session service.
//!
//! Scripts reach the environment through a line-oriented JSON protocol
//! ([`script`]); [`StdioTransport`] runs that protocol over a script file or
//! standard input, writing replies to standard output.

pub mod script;
pub mod stdio;

pub use script::{Call, Reply, ScriptRequest, ScriptSummary, dispatch, run_script};
pub use stdio::StdioTransport;

use crate::error::SqlResult;
use std::future::Future;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Start the transport and handle requests until input ends or the
    /// process is asked to stop.
    fn run(&self) -> impl Future<Output = SqlResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
