//! Server-sent event decoding for streaming responses.
//!
//! # Structure
//!
//! - `lines` - Splits a chunked byte source into text lines
//! - `stream` - Frames lines into events and exposes the pull-based `EventStream`

mod lines;
mod stream;

use serde::Serialize;
use serde_json::Value;

pub use lines::{ByteStream, MAX_LINE_BYTES};
pub use stream::{EventStream, parse_block};

/// Event name used when a block carries no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SseEvent {
    pub event: String,
    pub data: EventData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Payload of an event: JSON when the data lines parse as JSON, the raw text
/// otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventData {
    Json(Value),
    Text(String),
}

impl EventData {
    pub fn parse(text: String) -> Self {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => EventData::Json(value),
            Err(_) => EventData::Text(text),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            EventData::Json(value) => Some(value),
            EventData::Text(_) => None,
        }
    }

    /// Folds the payload into a JSON value; raw text becomes a JSON string.
    pub fn into_value(self) -> Value {
        match self {
            EventData::Json(value) => value,
            EventData::Text(text) => Value::String(text),
        }
    }
}
