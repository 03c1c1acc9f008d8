//! Incoming CDP frame classification.
//!
//! Every text frame received from the browser decodes into exactly one of
//! three well-formed kinds, or [`IncomingFrame::Unknown`]:
//!
//! - response: `{"id": N, "result": {…}}`
//! - error response: `{"id": N, "error": {"code": N, "message": "…"}}`
//! - event: `{"method": "Domain.event", "params": {…}, "sessionId"?: "…"}`
//!
//! Decoding never fails; malformed input classifies as `Unknown` and
//! preserves the original text.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::identifiers::{RequestId, SessionId};

// ============================================================================
// Frame Types
// ============================================================================

/// A successful response to a command.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    /// Matches the command id.
    pub id: RequestId,
    /// Result payload; empty object when the browser sent none.
    pub result: Value,
}

/// An error response to a command.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorFrame {
    /// Matches the command id.
    pub id: RequestId,
    /// Protocol error code.
    pub code: i64,
    /// Protocol error message.
    pub message: String,
    /// Optional extra error data.
    pub data: Option<Value>,
}

/// An unsolicited event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    /// Event name in `Domain.event` form.
    pub method: String,
    /// Event payload; empty object when the browser sent none.
    pub params: Value,
    /// Session the event is scoped to; absent for browser-level events.
    pub session_id: Option<SessionId>,
}

/// One classified incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingFrame {
    /// Successful command response.
    Response(ResponseFrame),
    /// Error command response.
    Error(ErrorFrame),
    /// Unsolicited event.
    Event(EventFrame),
    /// Anything that does not fit the three shapes above, preserved verbatim.
    Unknown {
        /// The original frame text.
        raw: String,
    },
}

// ============================================================================
// Decoding
// ============================================================================

/// Fallback message for error frames that omit one.
const UNKNOWN_CDP_ERROR: &str = "Unknown CDP error";

impl IncomingFrame {
    /// Classifies one received text frame.
    #[must_use]
    pub fn decode(text: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return Self::Unknown {
                raw: text.to_string(),
            };
        };

        let Some(object) = value.as_object() else {
            return Self::Unknown {
                raw: text.to_string(),
            };
        };

        if let Some(id) = object.get("id").and_then(Value::as_u64) {
            let id = RequestId::new(id);

            if let Some(error) = object.get("error").and_then(Value::as_object) {
                return Self::Error(ErrorFrame {
                    id,
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or(UNKNOWN_CDP_ERROR)
                        .to_string(),
                    data: error.get("data").cloned(),
                });
            }

            return Self::Response(ResponseFrame {
                id,
                result: object
                    .get("result")
                    .cloned()
                    .unwrap_or_else(empty_object),
            });
        }

        if let Some(method) = object.get("method").and_then(Value::as_str) {
            return Self::Event(EventFrame {
                method: method.to_string(),
                params: object
                    .get("params")
                    .cloned()
                    .unwrap_or_else(empty_object),
                session_id: object
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .map(SessionId::new),
            });
        }

        Self::Unknown {
            raw: text.to_string(),
        }
    }
}

#[inline]
fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_response() {
        let frame = IncomingFrame::decode(r#"{"id":3,"result":{"frameId":"f1"}}"#);
        match frame {
            IncomingFrame::Response(r) => {
                assert_eq!(r.id, RequestId::new(3));
                assert_eq!(r.result, json!({"frameId": "f1"}));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn decode_response_without_result_defaults_empty() {
        let frame = IncomingFrame::decode(r#"{"id":7}"#);
        match frame {
            IncomingFrame::Response(r) => assert_eq!(r.result, json!({})),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn decode_error() {
        let frame =
            IncomingFrame::decode(r#"{"id":4,"error":{"code":-32000,"message":"Target closed"}}"#);
        match frame {
            IncomingFrame::Error(e) => {
                assert_eq!(e.id, RequestId::new(4));
                assert_eq!(e.code, -32000);
                assert_eq!(e.message, "Target closed");
                assert!(e.data.is_none());
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn decode_error_without_message_defaults() {
        let frame = IncomingFrame::decode(r#"{"id":4,"error":{"code":-32000}}"#);
        match frame {
            IncomingFrame::Error(e) => assert_eq!(e.message, "Unknown CDP error"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn decode_event() {
        let frame = IncomingFrame::decode(
            r#"{"method":"Page.loadEventFired","params":{"timestamp":1.0},"sessionId":"s1"}"#,
        );
        match frame {
            IncomingFrame::Event(e) => {
                assert_eq!(e.method, "Page.loadEventFired");
                assert_eq!(e.params, json!({"timestamp": 1.0}));
                assert_eq!(e.session_id, Some(SessionId::new("s1")));
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn decode_browser_level_event() {
        let frame = IncomingFrame::decode(r#"{"method":"Target.targetCreated"}"#);
        match frame {
            IncomingFrame::Event(e) => {
                assert_eq!(e.params, json!({}));
                assert!(e.session_id.is_none());
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn decode_unknown_preserves_input() {
        for raw in ["not json at all", "[1,2,3]", r#"{"neither":"kind"}"#] {
            match IncomingFrame::decode(raw) {
                IncomingFrame::Unknown { raw: kept } => assert_eq!(kept, raw),
                other => panic!("expected unknown for {raw:?}, got {other:?}"),
            }
        }
    }
}
