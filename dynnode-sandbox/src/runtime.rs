//! Engine trait and implementations

pub mod v8;

use crate::execution::RunContext;
use async_trait::async_trait;
use dynnode_common::RunRequest;
use serde::{Deserialize, Serialize};

pub use v8::V8Engine;

/// Which authoring style a script is expected to follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryConvention {
    /// Call `main(ctx, api)` when the code defines it, otherwise use the
    /// body's own `return` value
    #[default]
    Auto,
    /// The code must define `main`; bare scripts are rejected
    RequireMain,
}

impl std::str::FromStr for EntryConvention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(EntryConvention::Auto),
            "require-main" | "main" => Ok(EntryConvention::RequireMain),
            other => Err(format!("unknown entry convention: {}", other)),
        }
    }
}

impl std::fmt::Display for EntryConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryConvention::Auto => f.write_str("auto"),
            EntryConvention::RequireMain => f.write_str("require-main"),
        }
    }
}

/// Script engine abstraction.
///
/// `execute` runs on the worker's own thread and may hold `!Send` state
/// (a V8 isolate) across awaits. It reports only through `ctx.sink`; the
/// caller emits DONE once it returns.
#[async_trait(?Send)]
pub trait Engine: Send + Sync {
    async fn execute(&self, request: RunRequest, ctx: RunContext);

    /// Get engine name
    fn name(&self) -> &str;
}

/// Blank context text stands for `{}`.
///
/// Anything else is handed to the script's own `JSON.parse`, which decides
/// what counts as well-formed (no nesting limit, `1e400` is `Infinity`).
pub fn normalize_context(context_text: &str) -> &str {
    if context_text.trim().is_empty() {
        "{}"
    } else {
        context_text
    }
}
