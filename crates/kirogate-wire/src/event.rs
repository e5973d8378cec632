//! Frame → event classification.
//!
//! This is the single place wire discriminators are decoded. Dispatch order:
//! `:message-type` of `error` / `exception` first, then the `:event-type`
//! string. Event payloads are JSON decoded leniently — unknown keys are
//! ignored and a payload that fails to parse demotes the frame to
//! [`Event::Unknown`] rather than failing the stream; the upstream schema
//! evolves ahead of us.

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use crate::frame::Frame;

pub const HEADER_MESSAGE_TYPE: &str = ":message-type";
pub const HEADER_EVENT_TYPE: &str = ":event-type";
pub const HEADER_ERROR_CODE: &str = ":error-code";
pub const HEADER_EXCEPTION_TYPE: &str = ":exception-type";

/// Streamed assistant text fragment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponseEvent {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub message_status: Option<String>,
}

impl AssistantResponseEvent {
    /// `COMPLETED` status ends the assistant text.
    pub fn is_completed(&self) -> bool {
        self.message_status.as_deref() == Some("COMPLETED")
    }
}

/// Streamed tool-call fragment.
///
/// The first chunk typically carries `name` and an object `input`; later
/// chunks stream string fragments of the argument JSON; `stop` terminates
/// the call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseEvent {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub stop: bool,
}

/// Context-window consumption update.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUsageEvent {
    #[serde(default)]
    pub context_usage_percentage: f64,
}

/// A classified upstream event.
#[derive(Debug, Clone)]
pub enum Event {
    AssistantResponse(AssistantResponseEvent),
    ToolUse(ToolUseEvent),
    ContextUsage(ContextUsageEvent),
    Metering,
    SessionStart,
    SessionEnd,
    ToolCallRequest,
    ToolCallError,
    Unknown {
        raw_type: String,
        raw_payload: Bytes,
    },
    Error {
        code: String,
        message: String,
    },
    Exception {
        kind: String,
        message: String,
    },
}

/// Classify a decoded frame into its event variant.
pub fn classify(frame: &Frame) -> Event {
    match frame.header_str(HEADER_MESSAGE_TYPE) {
        Some("error") => Event::Error {
            code: frame
                .header_str(HEADER_ERROR_CODE)
                .unwrap_or("UnknownError")
                .to_owned(),
            message: payload_text(frame),
        },
        Some("exception") => Event::Exception {
            kind: frame
                .header_str(HEADER_EXCEPTION_TYPE)
                .unwrap_or("UnknownException")
                .to_owned(),
            message: payload_text(frame),
        },
        _ => classify_event(frame),
    }
}

fn classify_event(frame: &Frame) -> Event {
    let event_type = frame.header_str(HEADER_EVENT_TYPE).unwrap_or("");
    match event_type {
        "assistantResponseEvent" => match serde_json::from_slice(&frame.payload) {
            Ok(ev) => Event::AssistantResponse(ev),
            Err(_) => unknown(frame, event_type),
        },
        "toolUseEvent" => match serde_json::from_slice(&frame.payload) {
            Ok(ev) => Event::ToolUse(ev),
            Err(_) => unknown(frame, event_type),
        },
        "contextUsageEvent" => match serde_json::from_slice(&frame.payload) {
            Ok(ev) => Event::ContextUsage(ev),
            Err(_) => unknown(frame, event_type),
        },
        "meteringEvent" => Event::Metering,
        "sessionStartEvent" => Event::SessionStart,
        "sessionEndEvent" => Event::SessionEnd,
        "toolCallRequestEvent" => Event::ToolCallRequest,
        "toolCallErrorEvent" => Event::ToolCallError,
        other => unknown(frame, other),
    }
}

fn unknown(frame: &Frame, raw_type: &str) -> Event {
    Event::Unknown {
        raw_type: raw_type.to_owned(),
        raw_payload: frame.payload.clone(),
    }
}

fn payload_text(frame: &Frame) -> String {
    match std::str::from_utf8(&frame.payload) {
        Ok(s) if !s.is_empty() => s.to_owned(),
        _ => "Unknown error".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Header, HeaderValue};

    fn frame(headers: &[(&str, &str)], payload: &[u8]) -> Frame {
        Frame::new(
            headers
                .iter()
                .map(|(n, v)| Header::new(*n, HeaderValue::String((*v).into())))
                .collect(),
            Bytes::copy_from_slice(payload),
        )
    }

    #[test]
    fn classifies_assistant_response() {
        let f = frame(
            &[
                (HEADER_MESSAGE_TYPE, "event"),
                (HEADER_EVENT_TYPE, "assistantResponseEvent"),
            ],
            br#"{"content":"hello","messageStatus":"COMPLETED","extraField":1}"#,
        );
        match classify(&f) {
            Event::AssistantResponse(ev) => {
                assert_eq!(ev.content, "hello");
                assert!(ev.is_completed());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn classifies_tool_use_with_object_input() {
        let f = frame(
            &[
                (HEADER_MESSAGE_TYPE, "event"),
                (HEADER_EVENT_TYPE, "toolUseEvent"),
            ],
            br#"{"name":"search","toolUseId":"t1","input":{"q":"x"},"stop":false}"#,
        );
        match classify(&f) {
            Event::ToolUse(ev) => {
                assert_eq!(ev.name.as_deref(), Some("search"));
                assert_eq!(ev.tool_use_id.as_deref(), Some("t1"));
                assert!(ev.input.is_some());
                assert!(!ev.stop);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn classifies_context_usage() {
        let f = frame(
            &[
                (HEADER_MESSAGE_TYPE, "event"),
                (HEADER_EVENT_TYPE, "contextUsageEvent"),
            ],
            br#"{"contextUsagePercentage":50.0}"#,
        );
        match classify(&f) {
            Event::ContextUsage(ev) => assert_eq!(ev.context_usage_percentage, 50.0),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn error_frame_uses_code_header_and_payload_message() {
        let f = frame(
            &[
                (HEADER_MESSAGE_TYPE, "error"),
                (HEADER_ERROR_CODE, "ThrottlingError"),
            ],
            b"slow down",
        );
        match classify(&f) {
            Event::Error { code, message } => {
                assert_eq!(code, "ThrottlingError");
                assert_eq!(message, "slow down");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn error_frame_defaults() {
        let f = frame(&[(HEADER_MESSAGE_TYPE, "error")], &[0xFF, 0xFE]);
        match classify(&f) {
            Event::Error { code, message } => {
                assert_eq!(code, "UnknownError");
                assert_eq!(message, "Unknown error");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn exception_frame() {
        let f = frame(
            &[
                (HEADER_MESSAGE_TYPE, "exception"),
                (HEADER_EXCEPTION_TYPE, "AccessDeniedException"),
            ],
            b"no",
        );
        match classify(&f) {
            Event::Exception { kind, message } => {
                assert_eq!(kind, "AccessDeniedException");
                assert_eq!(message, "no");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_event_type_is_unknown() {
        let f = frame(
            &[
                (HEADER_MESSAGE_TYPE, "event"),
                (HEADER_EVENT_TYPE, "brandNewEvent"),
            ],
            br#"{"who":"knows"}"#,
        );
        match classify(&f) {
            Event::Unknown {
                raw_type,
                raw_payload,
            } => {
                assert_eq!(raw_type, "brandNewEvent");
                assert_eq!(&raw_payload[..], br#"{"who":"knows"}"#);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn malformed_payload_demotes_to_unknown() {
        let f = frame(
            &[
                (HEADER_MESSAGE_TYPE, "event"),
                (HEADER_EVENT_TYPE, "assistantResponseEvent"),
            ],
            b"not json at all",
        );
        assert!(matches!(classify(&f), Event::Unknown { .. }));
    }

    #[test]
    fn headerless_frame_is_unknown() {
        let f = Frame::new(Vec::new(), Bytes::from_static(b"{}"));
        match classify(&f) {
            Event::Unknown { raw_type, .. } => assert_eq!(raw_type, ""),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
