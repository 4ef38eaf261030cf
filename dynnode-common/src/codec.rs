//! JSON-lines framing for the worker protocol
//!
//! One message per line. Used by the stdio worker transport and by hosts that
//! talk to it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("blank protocol line")]
    Blank,

    #[error("malformed protocol line: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode a message as a single line (no trailing newline).
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode one line into a message. Surrounding whitespace is ignored.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, CodecError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(CodecError::Blank);
    }
    Ok(serde_json::from_str(line)?)
}
