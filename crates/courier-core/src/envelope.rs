//! The routed message envelope.
//!
//! An [`Envelope`] is the unit of routed traffic. Its three sections map
//! one-to-one onto the wire JSON:
//!
//! - `message_info` — descriptive metadata (origin platform, message id,
//!   timestamp, optional sender / group / format descriptors). The routing
//!   layer never inspects these.
//! - `message_segment` — the payload: a typed tag plus opaque data, possibly
//!   recursively structured. Opaque to routing.
//! - `message_dim` — the routing dimensions `(api_key, platform)`, naming the
//!   **recipient**. Both must be non-empty for the envelope to be routable.
//!
//! Every struct carries a flattened catch-all map so fields added by newer
//! peers survive a decode→encode round trip.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Routing dimensions naming the recipient.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDim {
    /// Recipient api_key.
    pub api_key: String,
    /// Recipient platform tag.
    pub platform: String,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl MessageDim {
    /// Build routing dimensions from the recipient coordinates.
    #[must_use]
    pub fn new(api_key: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            platform: platform.into(),
            extra: Map::new(),
        }
    }
}

/// Sender descriptor. All fields optional; unknown fields preserved.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SenderInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_nickname: Option<String>,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Group (multi-party conversation) descriptor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Content-format descriptor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_format: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept_format: Option<Vec<String>>,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Descriptive metadata about an envelope. Not consulted for routing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    /// Origin platform tag.
    pub platform: String,
    /// Message identifier assigned by the origin.
    pub message_id: String,
    /// Seconds since the Unix epoch.
    pub time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_info: Option<SenderInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_info: Option<GroupInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_info: Option<FormatInfo>,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl MessageInfo {
    /// Metadata stamped with the current wall-clock time.
    #[must_use]
    pub fn now(platform: impl Into<String>, message_id: impl Into<String>) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let time = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        Self {
            platform: platform.into(),
            message_id: message_id.into(),
            time,
            ..Self::default()
        }
    }
}

/// The payload: a typed tag plus opaque data.
///
/// `data` is an arbitrary JSON value; nested segment lists are expressed as
/// arrays of segment-shaped objects inside it rather than as a recursive
/// type, so round-tripping is exact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    pub segment_type: String,
    pub data: Value,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Segment {
    /// Build a segment from a tag and arbitrary data.
    #[must_use]
    pub fn new(segment_type: impl Into<String>, data: Value) -> Self {
        Self {
            segment_type: segment_type.into(),
            data,
            extra: Map::new(),
        }
    }

    /// Convenience constructor for plain text payloads.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new("text", Value::String(text.into()))
    }
}

/// The unit of routed traffic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_info: MessageInfo,
    pub message_segment: Segment,
    pub message_dim: MessageDim,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Assemble an envelope from its three sections.
    #[must_use]
    pub fn new(message_info: MessageInfo, message_segment: Segment, message_dim: MessageDim) -> Self {
        Self {
            message_info,
            message_segment,
            message_dim,
            extra: Map::new(),
        }
    }

    /// Recipient api_key from the routing dimensions.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.message_dim.api_key
    }

    /// Recipient platform from the routing dimensions.
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.message_dim.platform
    }

    /// Whether both routing dimensions are non-empty.
    #[must_use]
    pub fn is_routable(&self) -> bool {
        !self.message_dim.api_key.is_empty() && !self.message_dim.platform.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Envelope {
        Envelope::new(
            MessageInfo {
                platform: "wechat".into(),
                message_id: "m1".into(),
                time: 1_700_000_000.25,
                sender_info: Some(SenderInfo {
                    user_id: Some("u42".into()),
                    user_nickname: Some("Ada".into()),
                    extra: Map::new(),
                }),
                group_info: None,
                format_info: None,
                extra: Map::new(),
            },
            Segment::text("hello"),
            MessageDim::new("kA", "wechat"),
        )
    }

    #[test]
    fn accessors_return_routing_dims() {
        let env = sample();
        assert_eq!(env.api_key(), "kA");
        assert_eq!(env.platform(), "wechat");
    }

    #[test]
    fn routable_requires_both_dims() {
        let mut env = sample();
        assert!(env.is_routable());
        env.message_dim.api_key.clear();
        assert!(!env.is_routable());
        env.message_dim.api_key = "kA".into();
        env.message_dim.platform.clear();
        assert!(!env.is_routable());
    }

    #[test]
    fn roundtrip_preserves_envelope() {
        let env = sample();
        let encoded = serde_json::to_string(&env).unwrap();
        let decoded: Envelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn roundtrip_preserves_nested_segments() {
        let env = Envelope::new(
            MessageInfo::now("qq", "m2"),
            Segment::new(
                "seglist",
                json!([
                    {"type": "text", "data": "hi"},
                    {"type": "image", "data": {"url": "https://example/a.png"}},
                ]),
            ),
            MessageDim::new("kB", "qq"),
        );
        let decoded: Envelope =
            serde_json::from_str(&serde_json::to_string(&env).unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn unknown_fields_survive_roundtrip() {
        let raw = json!({
            "message_info": {
                "platform": "wechat",
                "message_id": "m3",
                "time": 1.5,
                "trace_id": "t-99"
            },
            "message_segment": {"type": "text", "data": "x"},
            "message_dim": {"api_key": "k", "platform": "p", "shard": 7},
            "future_field": {"a": [1, 2]}
        });
        let env: Envelope = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(env.message_info.extra["trace_id"], "t-99");
        assert_eq!(env.message_dim.extra["shard"], 7);
        let back = serde_json::to_value(&env).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn wire_field_names_verbatim() {
        let env = sample();
        let value = serde_json::to_value(&env).unwrap();
        assert!(value.get("message_info").is_some());
        assert!(value.get("message_segment").is_some());
        assert!(value.get("message_dim").is_some());
        assert_eq!(value["message_segment"]["type"], "text");
        assert_eq!(value["message_dim"]["api_key"], "kA");
    }

    #[test]
    fn message_info_now_stamps_time() {
        let info = MessageInfo::now("qq", "m9");
        assert!(info.time > 1_600_000_000.0);
        assert_eq!(info.platform, "qq");
    }

    #[test]
    fn optional_descriptors_omitted_when_absent() {
        let env = Envelope::new(
            MessageInfo::now("qq", "m1"),
            Segment::text("x"),
            MessageDim::new("k", "qq"),
        );
        let value = serde_json::to_value(&env).unwrap();
        assert!(value["message_info"].get("sender_info").is_none());
        assert!(value["message_info"].get("group_info").is_none());
        assert!(value["message_info"].get("format_info").is_none());
    }
}
