//! Protocol message subset consumed by the sink.
//!
//! The upstream reader emits a stream of typed messages; only record messages carry
//! payloads that end up in stream buffers. State and log messages are accepted by the
//! consumer and ignored, so the full subset is modeled here to keep ingestion a single
//! entry point.

use serde::{Deserialize, Serialize};

/// A message produced by the upstream protocol reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A data record destined for a configured stream.
    Record(RecordMessage),
    /// A source checkpoint. Opaque to the sink.
    State(StateMessage),
    /// A log line forwarded from the source. Opaque to the sink.
    Log(LogMessage),
}

/// A single data record tagged with its source stream name.
///
/// The serialized form of the whole record (stream, data and emission timestamp) is what
/// lands in the stream's buffer and ultimately in the staging table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    /// Name of the source stream this record belongs to.
    pub stream: String,
    /// Opaque record payload.
    pub data: serde_json::Value,
    /// Source emission timestamp in milliseconds since the epoch.
    #[serde(default)]
    pub emitted_at: i64,
}

/// A checkpoint message emitted by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    /// Opaque checkpoint payload.
    pub data: serde_json::Value,
}

/// A log message forwarded from the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

/// Severity of a forwarded [`LogMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_message_deserializes_from_tagged_json() {
        let raw = r#"{"type":"record","stream":"users","data":{"id":1},"emitted_at":1724700000000}"#;
        let message: Message = serde_json::from_str(raw).unwrap();

        let Message::Record(record) = message else {
            panic!("expected a record message");
        };
        assert_eq!(record.stream, "users");
        assert_eq!(record.data, json!({"id": 1}));
        assert_eq!(record.emitted_at, 1724700000000);
    }

    #[test]
    fn emitted_at_defaults_to_zero_when_absent() {
        let raw = r#"{"type":"record","stream":"users","data":{}}"#;
        let message: Message = serde_json::from_str(raw).unwrap();

        let Message::Record(record) = message else {
            panic!("expected a record message");
        };
        assert_eq!(record.emitted_at, 0);
    }

    #[test]
    fn state_message_is_recognized() {
        let raw = r#"{"type":"state","data":{"cursor":"2024-01-01"}}"#;
        let message: Message = serde_json::from_str(raw).unwrap();

        assert!(matches!(message, Message::State(_)));
    }
}
