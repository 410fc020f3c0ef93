//! Wire frame classification.
//!
//! Every frame is one UTF-8 JSON document per WebSocket text frame, in one of
//! two shapes:
//!
//! - **standard**: the envelope itself — recognized by the presence of a
//!   top-level `message_dim` object;
//! - **custom**: `{ "type": str, "payload": any, "target_user"?: str,
//!   "target_platform"?: str }` — a top-level `type` without `message_dim`.
//!
//! A frame matching neither shape is malformed; malformed frames are logged
//! and skipped by both peers, and never kill the connection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::envelope::Envelope;

/// Close code: normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code: going away (server or client shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code: policy violation (authentication failure).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code: internal error.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Type tag reserved for the envelope shape; rejected on custom frames.
pub const RESERVED_ENVELOPE_TYPE: &str = "message";

/// A non-envelope frame dispatched by its top-level `type` tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_platform: Option<String>,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl CustomMessage {
    /// Build an untargeted custom message.
    #[must_use]
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
            target_user: None,
            target_platform: None,
            extra: Map::new(),
        }
    }
}

/// A classified incoming frame.
#[derive(Clone, Debug, PartialEq)]
pub enum WireFrame {
    /// A standard routed envelope.
    Standard(Envelope),
    /// A custom message for the handler table.
    Custom(CustomMessage),
}

/// Why a frame failed classification.
#[derive(Debug, Error)]
pub enum WireError {
    /// The frame was not valid JSON, or its fields had the wrong shape.
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame was JSON but matched neither the envelope nor custom shape.
    #[error("frame matches neither envelope nor custom shape")]
    UnknownShape,
    /// A custom frame with an empty or reserved `type` tag.
    #[error("custom frame has invalid type tag {0:?}")]
    InvalidType(String),
}

/// Classify one text frame.
///
/// Presence of `message_dim` selects the standard shape; otherwise a
/// top-level string `type` selects the custom shape.
pub fn decode_frame(text: &str) -> Result<WireFrame, WireError> {
    let value: Value = serde_json::from_str(text)?;

    if value.get("message_dim").is_some() {
        let envelope: Envelope = serde_json::from_value(value)?;
        return Ok(WireFrame::Standard(envelope));
    }

    if value.get("type").is_some_and(Value::is_string) {
        let custom: CustomMessage = serde_json::from_value(value)?;
        if custom.message_type.is_empty() || custom.message_type == RESERVED_ENVELOPE_TYPE {
            return Err(WireError::InvalidType(custom.message_type));
        }
        return Ok(WireFrame::Custom(custom));
    }

    Err(WireError::UnknownShape)
}

/// Serialize an envelope to its wire form.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, WireError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Serialize a custom message to its wire form.
pub fn encode_custom(message: &CustomMessage) -> Result<String, WireError> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{MessageDim, MessageInfo, Segment};
    use serde_json::json;

    #[test]
    fn envelope_frame_classified_standard() {
        let env = Envelope::new(
            MessageInfo::now("wechat", "m1"),
            Segment::text("hi"),
            MessageDim::new("kA", "wechat"),
        );
        let text = encode_envelope(&env).unwrap();
        match decode_frame(&text).unwrap() {
            WireFrame::Standard(decoded) => assert_eq!(decoded, env),
            WireFrame::Custom(_) => panic!("expected standard frame"),
        }
    }

    #[test]
    fn custom_frame_classified_custom() {
        let text = r#"{"type":"presence","payload":{"status":"online"},"target_user":"u1"}"#;
        match decode_frame(text).unwrap() {
            WireFrame::Custom(custom) => {
                assert_eq!(custom.message_type, "presence");
                assert_eq!(custom.payload["status"], "online");
                assert_eq!(custom.target_user.as_deref(), Some("u1"));
                assert!(custom.target_platform.is_none());
            }
            WireFrame::Standard(_) => panic!("expected custom frame"),
        }
    }

    #[test]
    fn message_dim_wins_over_type() {
        // A frame carrying both message_dim and type is an envelope.
        let text = json!({
            "type": "anything",
            "message_info": {"platform": "p", "message_id": "m", "time": 1.0},
            "message_segment": {"type": "text", "data": "x"},
            "message_dim": {"api_key": "k", "platform": "p"}
        })
        .to_string();
        assert!(matches!(
            decode_frame(&text).unwrap(),
            WireFrame::Standard(_)
        ));
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(
            decode_frame("not json at all"),
            Err(WireError::Json(_))
        ));
    }

    #[test]
    fn json_array_is_malformed() {
        assert!(matches!(
            decode_frame("[1,2,3]"),
            Err(WireError::UnknownShape)
        ));
    }

    #[test]
    fn object_without_discriminator_is_malformed() {
        assert!(matches!(
            decode_frame(r#"{"payload": 1}"#),
            Err(WireError::UnknownShape)
        ));
    }

    #[test]
    fn non_string_type_is_malformed() {
        assert!(matches!(
            decode_frame(r#"{"type": 7, "payload": {}}"#),
            Err(WireError::UnknownShape)
        ));
    }

    #[test]
    fn empty_type_rejected() {
        assert!(matches!(
            decode_frame(r#"{"type": "", "payload": {}}"#),
            Err(WireError::InvalidType(_))
        ));
    }

    #[test]
    fn reserved_type_rejected() {
        let text = format!(r#"{{"type": "{RESERVED_ENVELOPE_TYPE}", "payload": {{}}}}"#);
        assert!(matches!(
            decode_frame(&text),
            Err(WireError::InvalidType(_))
        ));
    }

    #[test]
    fn custom_payload_defaults_to_null() {
        match decode_frame(r#"{"type":"ping"}"#).unwrap() {
            WireFrame::Custom(custom) => assert!(custom.payload.is_null()),
            WireFrame::Standard(_) => panic!("expected custom frame"),
        }
    }

    #[test]
    fn custom_roundtrip_preserves_targets() {
        let mut msg = CustomMessage::new("sync", json!({"n": 1}));
        msg.target_user = Some("u1".into());
        msg.target_platform = Some("qq".into());
        let text = encode_custom(&msg).unwrap();
        match decode_frame(&text).unwrap() {
            WireFrame::Custom(decoded) => assert_eq!(decoded, msg),
            WireFrame::Standard(_) => panic!("expected custom frame"),
        }
    }

    #[test]
    fn malformed_envelope_body_is_json_error() {
        // message_dim present but message_segment missing → shape error.
        let text = r#"{"message_dim": {"api_key": "k", "platform": "p"}}"#;
        assert!(matches!(decode_frame(text), Err(WireError::Json(_))));
    }
}
