//! Text rendering of run output for display hosts

use dynnode_common::LogEntry;
use serde_json::Value;

/// Pretty JSON with 2-space indentation
pub fn result_text(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Message, followed by a blank line and the stack when present
pub fn error_text(message: &str, stack: Option<&str>) -> String {
    match stack {
        Some(stack) if !stack.is_empty() => format!("{}\n\n{}", message, stack),
        _ => message.to_string(),
    }
}

/// `HH:MM:SS [level] text`
pub fn format_log_line(entry: &LogEntry) -> String {
    format!(
        "{} [{}] {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.level,
        entry.text
    )
}

/// Output panel: the error wins over the result
pub fn panel_text(result_text: &str, error_text: &str) -> String {
    if !error_text.is_empty() {
        format!("[ERROR]\n{}", error_text)
    } else if !result_text.is_empty() {
        format!("[RESULT]\n{}", result_text)
    } else {
        String::new()
    }
}
