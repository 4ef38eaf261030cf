//! Messages exchanged between a runner controller and its sandbox worker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lower bound accepted for a run deadline
pub const MIN_TIMEOUT_MS: u64 = 300;

/// Upper bound accepted for a run deadline
pub const MAX_TIMEOUT_MS: u64 = 10_000;

/// Deadline used when the host does not pick one
pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;

/// Clamp a host-supplied timeout into `[MIN_TIMEOUT_MS, MAX_TIMEOUT_MS]`.
pub fn clamp_timeout_ms(timeout_ms: u64) -> u64 {
    timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

/// Console level a script logged at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(LogLevel::Log),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// One execution of script text against one context value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Script source text
    pub code: String,

    /// JSON text of the context object (may be blank or malformed)
    #[serde(rename = "contextText", default)]
    pub context_text: String,

    /// Wall-clock deadline in milliseconds, clamped on decode
    #[serde(
        rename = "timeoutMs",
        default = "default_timeout_ms",
        deserialize_with = "deserialize_timeout_ms"
    )]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn deserialize_timeout_ms<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    u64::deserialize(deserializer).map(clamp_timeout_ms)
}

impl RunRequest {
    /// Build a request; the timeout is clamped into the accepted range.
    pub fn new(code: impl Into<String>, context_text: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            code: code.into(),
            context_text: context_text.into(),
            timeout_ms: clamp_timeout_ms(timeout_ms),
        }
    }
}

/// A captured console line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub text: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            text: text.into(),
        }
    }
}

/// Controller -> worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum WorkerCommand {
    Run(RunRequest),
    Stop,
}

/// Worker -> controller
///
/// A run produces `LOG* (RESULT|ERROR)? DONE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum WorkerEvent {
    Log(LogEntry),
    Result {
        value: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        #[serde(
            rename = "stackTrace",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        stack_trace: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Done {
        timestamp: DateTime<Utc>,
    },
}

impl WorkerEvent {
    pub fn log(level: LogLevel, text: impl Into<String>) -> Self {
        WorkerEvent::Log(LogEntry::new(level, text))
    }

    pub fn result(value: serde_json::Value) -> Self {
        WorkerEvent::Result {
            value,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>, stack_trace: Option<String>) -> Self {
        WorkerEvent::Error {
            message: message.into(),
            stack_trace,
            timestamp: Utc::now(),
        }
    }

    pub fn done() -> Self {
        WorkerEvent::Done {
            timestamp: Utc::now(),
        }
    }

    /// RESULT or ERROR
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerEvent::Result { .. } | WorkerEvent::Error { .. })
    }

    pub fn is_done(&self) -> bool {
        matches!(self, WorkerEvent::Done { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::Log(_) => "LOG",
            WorkerEvent::Result { .. } => "RESULT",
            WorkerEvent::Error { .. } => "ERROR",
            WorkerEvent::Done { .. } => "DONE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timeout_clamp() {
        assert_eq!(clamp_timeout_ms(0), MIN_TIMEOUT_MS);
        assert_eq!(clamp_timeout_ms(2_000), 2_000);
        assert_eq!(clamp_timeout_ms(60_000), MAX_TIMEOUT_MS);
        assert_eq!(RunRequest::new("", "", 10).timeout_ms, 300);
    }

    #[test]
    fn test_run_command_wire_shape() {
        let cmd = WorkerCommand::Run(RunRequest::new("return 1", "{}", 500));
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            value,
            json!({"kind": "RUN", "code": "return 1", "contextText": "{}", "timeoutMs": 500})
        );

        let stop: WorkerCommand = serde_json::from_str(r#"{"kind":"STOP"}"#).unwrap();
        assert_eq!(stop, WorkerCommand::Stop);
    }

    #[test]
    fn test_decoded_run_timeout_is_clamped() {
        let decode = |line: &str| match serde_json::from_str::<WorkerCommand>(line).unwrap() {
            WorkerCommand::Run(request) => request.timeout_ms,
            other => panic!("unexpected command {:?}", other),
        };
        assert_eq!(decode(r#"{"kind":"RUN","code":"","timeoutMs":0}"#), MIN_TIMEOUT_MS);
        assert_eq!(
            decode(r#"{"kind":"RUN","code":"","timeoutMs":999999999}"#),
            MAX_TIMEOUT_MS
        );
        assert_eq!(decode(r#"{"kind":"RUN","code":"","timeoutMs":1500}"#), 1500);
        assert_eq!(decode(r#"{"kind":"RUN","code":""}"#), DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_event_wire_shape() {
        let value = serde_json::to_value(WorkerEvent::log(LogLevel::Warn, "hi")).unwrap();
        assert_eq!(value["kind"], "LOG");
        assert_eq!(value["level"], "warn");
        assert_eq!(value["text"], "hi");
        assert!(value["timestamp"].is_string());

        let value = serde_json::to_value(WorkerEvent::error("boom", None)).unwrap();
        assert_eq!(value["kind"], "ERROR");
        assert!(value.get("stackTrace").is_none());

        let value =
            serde_json::to_value(WorkerEvent::error("boom", Some("at x".into()))).unwrap();
        assert_eq!(value["stackTrace"], "at x");
    }

    #[test]
    fn test_event_classification() {
        assert!(WorkerEvent::result(json!(1)).is_terminal());
        assert!(WorkerEvent::error("x", None).is_terminal());
        assert!(!WorkerEvent::done().is_terminal());
        assert!(WorkerEvent::done().is_done());
        assert_eq!(WorkerEvent::log(LogLevel::Log, "").kind(), "LOG");
    }
}
