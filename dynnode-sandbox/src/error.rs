//! Failure taxonomy of a run
//!
//! Every variant ends up as an ERROR event; nothing here crosses the worker
//! boundary as a Rust error.

use dynnode_common::WorkerEvent;
use thiserror::Error;

pub const CONTEXT_PARSE_FAILURE: &str = "context parse failure";

#[derive(Debug, Error)]
pub enum RunError {
    /// Context text is not valid JSON; the script is not executed. Carries
    /// the parser's detail.
    #[error("context parse failure")]
    ContextParse(String),

    /// The script threw, or could not be compiled
    #[error("{message}")]
    ScriptRuntime {
        message: String,
        stack: Option<String>,
    },

    /// Wall-clock deadline passed before the script settled
    #[error("timeout: {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("memory limit exceeded")]
    MemoryLimit,

    /// The worker went away or could not be reached
    #[error("worker transport failure: {0}")]
    Transport(String),
}

impl RunError {
    pub fn script(message: impl Into<String>, stack: Option<String>) -> Self {
        RunError::ScriptRuntime {
            message: message.into(),
            stack,
        }
    }

    /// ERROR event describing this failure
    pub fn to_event(&self) -> WorkerEvent {
        let stack = match self {
            RunError::ContextParse(detail) => Some(detail.clone()),
            RunError::ScriptRuntime { stack, .. } => stack.clone(),
            _ => None,
        };
        WorkerEvent::error(self.to_string(), stack)
    }
}
