//! Query engine abstraction.
//!
//! Dispatch talks to the backing engine through [`QueryEngine`] and
//! [`EngineSession`]. Each dispatch opens a session, executes exactly one
//! statement, and closes the session on every exit path; sessions are never
//! pooled or reused across requests.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Rows;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine could not be reached or refused a new session.
    #[error("engine connection failed: {message}")]
    Connect { message: String },

    /// The statement was delivered but the engine reported a failure.
    #[error("{message}")]
    Execute { message: String },

    /// The engine answered with something the protocol does not allow.
    #[error("unexpected engine response: {message}")]
    Protocol { message: String },
}

/// Result of a single statement execution.
#[derive(Debug, Clone)]
pub struct StatementOutcome {
    pub rows: Rows,
    /// Engine-reported count, normalized against `rows.len()` by the HTTP
    /// implementation.
    pub row_count: u64,
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn EngineSession>, EngineError>;
}

#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Execute one parameterized statement. Parameter values travel as
    /// bindings, never spliced into the statement text.
    async fn execute(&self, statement: &str, bindings: &[serde_json::Value]) -> Result<StatementOutcome, EngineError>;

    /// Release the session. Best effort: failures are logged, not returned,
    /// since the dispatch outcome is already decided by this point.
    async fn close(self: Box<Self>);
}
