// ── Cross-boundary wire frames ──
//
// Every message between the host and the embedded widget is one JSON frame:
// a named emit (optionally carrying an ack correlation id) or the ack that
// answers it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome carried by an acknowledgement: a result payload or the reason
/// the remote side gave for failing.
pub type AckResult = Result<Value, String>;

/// A single frame on the cross-boundary channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// A named event with an optional payload. `ack` is present when the
    /// sender expects exactly one acknowledgement back.
    Emit {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
    },

    /// The acknowledgement for the emit with the same correlation id.
    Ack {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
}

impl Frame {
    pub fn emit(event: impl Into<String>, payload: Option<Value>, ack: Option<u64>) -> Self {
        Self::Emit {
            event: event.into(),
            payload,
            ack,
        }
    }

    /// Build the ack frame answering correlation id `id`.
    pub fn ack(id: u64, outcome: AckResult) -> Self {
        match outcome {
            Ok(result) => Self::Ack {
                id,
                error: None,
                result: (!result.is_null()).then_some(result),
            },
            Err(reason) => Self::Ack {
                id,
                error: Some(reason),
                result: None,
            },
        }
    }

    /// Decode a text frame. Returns `None` for anything that is not a frame.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!(error = %e, "Failed to parse channel frame");
                None
            }
        }
    }

    /// Event name, for emits.
    pub fn event(&self) -> Option<&str> {
        match self {
            Self::Emit { event, .. } => Some(event),
            Self::Ack { .. } => None,
        }
    }
}

/// Collapse the two optional slots of an ack frame into one tagged result.
///
/// An empty error string counts as no error, mirroring widgets that answer
/// `false`/`""` on success.
pub(crate) fn into_outcome(error: Option<String>, result: Option<Value>) -> AckResult {
    match error {
        Some(reason) if !reason.is_empty() => Err(reason),
        _ => Ok(result.unwrap_or(Value::Null)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emit_without_ack_omits_slots() {
        let frame = Frame::emit("navigation:dismiss", None, None);
        let text = serde_json::to_string(&frame).unwrap();
        assert_eq!(text, r#"{"type":"emit","event":"navigation:dismiss"}"#);
    }

    #[test]
    fn parse_emit_with_ack() {
        let frame = Frame::parse(
            r#"{"type":"emit","event":"set:map:style","payload":"dark","ack":7}"#,
        )
        .unwrap();
        assert_eq!(frame, Frame::emit("set:map:style", Some(json!("dark")), Some(7)));
        assert_eq!(frame.event(), Some("set:map:style"));
    }

    #[test]
    fn ack_error_round_trips_to_err() {
        let frame = Frame::ack(3, Err("Route not found".into()));
        let Frame::Ack { id, error, result } = frame else {
            panic!("expected ack frame");
        };
        assert_eq!(id, 3);
        assert_eq!(into_outcome(error, result), Err("Route not found".into()));
    }

    #[test]
    fn empty_error_string_is_success() {
        assert_eq!(into_outcome(Some(String::new()), None), Ok(Value::Null));
    }

    #[test]
    fn garbage_is_not_a_frame() {
        assert!(Frame::parse("not json at all").is_none());
        assert!(Frame::parse(r#"{"type":"hello"}"#).is_none());
    }
}
