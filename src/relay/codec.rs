//! Frame codec for the client-facing event stream.
//!
//! A frame is one `data: ` line followed by a blank line:
//! ```text
//! data: {"response":"He"}
//!
//! data: [DONE]
//! ```
//! Encoding and decoding are pure; neither touches I/O.

use bytes::Bytes;
use serde::Deserialize;

use crate::chat::Metric;

/// Prefix every frame line starts with.
pub const DATA_PREFIX: &str = "data: ";

/// Payload of the completion sentinel frame.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One logical event of a relayed stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalEvent {
    /// Incremental text fragment.
    Delta { text: String },
    /// Normal end of stream.
    Completion {
        final_id: Option<String>,
        metrics: Option<Vec<Metric>>,
    },
    /// Abnormal end of stream.
    Failure { message: String },
}

impl LogicalEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        LogicalEvent::Delta { text: text.into() }
    }

    pub fn completion() -> Self {
        LogicalEvent::Completion {
            final_id: None,
            metrics: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        LogicalEvent::Failure {
            message: message.into(),
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LogicalEvent::Delta { .. })
    }
}

#[derive(Deserialize)]
struct ResponseFrame {
    response: String,
}

/// Encode an event as a wire frame. `Failure` has no frame.
pub fn encode(event: &LogicalEvent) -> Option<Bytes> {
    match event {
        LogicalEvent::Delta { text } => {
            let payload = serde_json::json!({ "response": text });
            Some(Bytes::from(format!("{DATA_PREFIX}{payload}\n\n")))
        }
        LogicalEvent::Completion { .. } => {
            Some(Bytes::from(format!("{DATA_PREFIX}{DONE_SENTINEL}\n\n")))
        }
        LogicalEvent::Failure { .. } => None,
    }
}

/// Decode one line (without its terminator) into an event.
///
/// Lines without the prefix and payloads that are not `{"response": "<string>"}`
/// decode to nothing.
pub fn decode(line: &str) -> Option<LogicalEvent> {
    let payload = line.strip_suffix('\r').unwrap_or(line).strip_prefix(DATA_PREFIX)?;
    if payload == DONE_SENTINEL {
        return Some(LogicalEvent::completion());
    }
    serde_json::from_str::<ResponseFrame>(payload)
        .ok()
        .map(|frame| LogicalEvent::Delta {
            text: frame.response,
        })
}
