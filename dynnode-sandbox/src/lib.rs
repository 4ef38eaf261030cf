//! DynNode sandbox - isolated execution of user scripts
//!
//! A [`RunnerController`] owns at most one [`Worker`] thread, which executes
//! runs through an [`Engine`] (V8 via deno_core) and streams back
//! `LOG* (RESULT|ERROR)? DONE`.

mod controller;
mod error;
mod execution;
mod limits;
pub mod render;
mod runtime;
mod scratch;
pub mod stdio;
mod worker;

pub use controller::{
    ControllerConfig, DisplayState, RunnerController, DEFAULT_HARD_KILL_GRACE,
    DEFAULT_LOG_CAPACITY,
};
pub use error::{RunError, CONTEXT_PARSE_FAILURE};
pub use execution::{EventSink, KillSwitch, RunContext, RunId};
pub use limits::ResourceLimits;
pub use runtime::v8::create_runner_extension;
pub use runtime::{normalize_context, Engine, EntryConvention, V8Engine};
pub use scratch::{js_typeof, ScratchMap, DEFAULT_RESPONSE_KEY};
pub use worker::Worker;

/// Re-export common error types
pub type Result<T> = anyhow::Result<T>;
