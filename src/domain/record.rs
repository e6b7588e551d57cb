use crate::domain::LogValue;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Error)]
pub enum RecordDecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid timestamp {value}: {source}")]
    Timestamp {
        value: String,
        source: time::error::Parse,
    },
}

/// One decoded line of a session log.
#[derive(Clone, Debug, PartialEq)]
pub enum LogRecord {
    SessionMeta {
        timestamp: OffsetDateTime,
        payload: SessionMetaPayload,
    },
    TurnContext {
        timestamp: OffsetDateTime,
        payload: TurnContextPayload,
    },
    EventMessage {
        timestamp: OffsetDateTime,
        payload: EventMessagePayload,
    },
    ResponseItem {
        timestamp: OffsetDateTime,
        payload: ResponseItemPayload,
    },
    Unknown {
        timestamp: OffsetDateTime,
        tag: String,
        payload: LogValue,
    },
}

impl LogRecord {
    pub fn timestamp(&self) -> OffsetDateTime {
        match self {
            Self::SessionMeta { timestamp, .. }
            | Self::TurnContext { timestamp, .. }
            | Self::EventMessage { timestamp, .. }
            | Self::ResponseItem { timestamp, .. }
            | Self::Unknown { timestamp, .. } => *timestamp,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SessionMetaPayload {
    pub id: Option<String>,
    pub timestamp: Option<String>,
    pub cwd: Option<String>,
    pub originator: Option<String>,
    pub cli_version: Option<String>,
    pub instructions: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TurnContextPayload {
    pub cwd: Option<String>,
    pub approval_policy: Option<String>,
    pub model: Option<String>,
    pub effort: Option<String>,
    pub summary: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct EventMessagePayload {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ResponseItemPayload {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub content: Option<Vec<ContentBlock>>,
    pub summary: Option<Vec<ContentBlock>>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ContentBlock {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub text: Option<String>,
}

/// Decodes one log line. Unknown `type` tags never fail; a line missing
/// `timestamp` or `type` fails for that line only.
pub fn decode_record(line: &str) -> Result<LogRecord, RecordDecodeError> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    decode_record_value(&value)
}

pub fn decode_record_value(value: &serde_json::Value) -> Result<LogRecord, RecordDecodeError> {
    let raw_timestamp = value
        .get("timestamp")
        .and_then(|v| v.as_str())
        .ok_or(RecordDecodeError::MissingField("timestamp"))?;
    let timestamp = parse_rfc3339(raw_timestamp)?;

    let tag = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(RecordDecodeError::MissingField("type"))?;

    let payload = value.get("payload").cloned().unwrap_or(serde_json::Value::Null);

    let record = match tag {
        "session_meta" => LogRecord::SessionMeta {
            timestamp,
            payload: decode_payload(payload)?,
        },
        "turn_context" => LogRecord::TurnContext {
            timestamp,
            payload: decode_payload(payload)?,
        },
        "event_message" => LogRecord::EventMessage {
            timestamp,
            payload: decode_payload(payload)?,
        },
        "response_item" => LogRecord::ResponseItem {
            timestamp,
            payload: decode_payload(payload)?,
        },
        other => LogRecord::Unknown {
            timestamp,
            tag: other.to_string(),
            payload: LogValue::from_json(&payload),
        },
    };
    Ok(record)
}

fn decode_payload<T: Default + for<'de> Deserialize<'de>>(
    payload: serde_json::Value,
) -> Result<T, RecordDecodeError> {
    if payload.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(payload)?)
}

pub fn parse_rfc3339(value: &str) -> Result<OffsetDateTime, RecordDecodeError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|source| RecordDecodeError::Timestamp {
        value: value.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn decodes_session_meta() {
        let line = r#"{"timestamp":"2026-02-18T21:45:57.762Z","type":"session_meta","payload":{"id":"abc","timestamp":"2026-02-18T21:39:39.022Z","cwd":"/tmp/project","originator":"codex_cli_rs","cli_version":"0.34.0"}}"#;
        let record = decode_record(line).expect("decode");
        let LogRecord::SessionMeta { timestamp, payload } = record else {
            panic!("expected session_meta");
        };
        assert_eq!(timestamp, datetime!(2026-02-18 21:45:57.762 UTC));
        assert_eq!(payload.id.as_deref(), Some("abc"));
        assert_eq!(payload.cwd.as_deref(), Some("/tmp/project"));
        assert_eq!(payload.cli_version.as_deref(), Some("0.34.0"));
        assert_eq!(payload.instructions, None);
    }

    #[test]
    fn decodes_response_item_content() {
        let line = r#"{"timestamp":"2026-02-18T21:45:58Z","type":"response_item","payload":{"type":"function_call","call_id":"c1","name":"shell","content":[{"type":"input_text","text":"ls"}]}}"#;
        let record = decode_record(line).expect("decode");
        let LogRecord::ResponseItem { payload, .. } = record else {
            panic!("expected response_item");
        };
        assert_eq!(payload.kind, "function_call");
        assert_eq!(payload.call_id.as_deref(), Some("c1"));
        let content = payload.content.expect("content");
        assert_eq!(content[0].text.as_deref(), Some("ls"));
    }

    #[test]
    fn unknown_tag_decodes_to_unknown() {
        let line = r#"{"timestamp":"2026-02-18T21:45:58Z","type":"compact_summary","payload":{"note":"future shape","depth":2}}"#;
        let record = decode_record(line).expect("decode");
        let LogRecord::Unknown { tag, payload, .. } = record else {
            panic!("expected unknown");
        };
        assert_eq!(tag, "compact_summary");
        assert_eq!(
            payload.get("note").and_then(|v| v.as_str()),
            Some("future shape")
        );
    }

    #[test]
    fn missing_timestamp_is_a_hard_failure() {
        let line = r#"{"type":"event_message","payload":{"type":"user_message"}}"#;
        assert!(matches!(
            decode_record(line),
            Err(RecordDecodeError::MissingField("timestamp"))
        ));
    }

    #[test]
    fn missing_type_is_a_hard_failure() {
        let line = r#"{"timestamp":"2026-02-18T21:45:58Z","payload":{}}"#;
        assert!(matches!(
            decode_record(line),
            Err(RecordDecodeError::MissingField("type"))
        ));
    }

    #[test]
    fn tolerates_absent_payload_members() {
        let line = r#"{"timestamp":"2026-02-18T21:45:58Z","type":"turn_context","payload":{}}"#;
        let record = decode_record(line).expect("decode");
        let LogRecord::TurnContext { payload, .. } = record else {
            panic!("expected turn_context");
        };
        assert_eq!(payload, TurnContextPayload::default());
    }
}
