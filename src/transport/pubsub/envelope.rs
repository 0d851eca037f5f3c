//! fedmsg JSON envelope carried in the last frame of a pub/sub message

use crate::error::{MessagingError, MessagingResult};
use crate::message::{Payload, RawMessage, TransportHeaders};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Key the topic is copied to inside `msg`
pub const TOPIC_KEY: &str = "topic";

/// Key outbound content is stored under inside `msg`
pub const CONTENT_KEY: &str = "message-content";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    #[serde(default)]
    pub msg: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Envelope {
    /// Decode the envelope from a multipart message; the JSON lives in the last frame
    pub fn from_frames(frames: &[Bytes]) -> MessagingResult<Self> {
        let payload = frames
            .last()
            .ok_or_else(|| MessagingError::decode_failure("empty multipart message"))?;
        serde_json::from_slice(payload)
            .map_err(|e| MessagingError::decode_failure(format!("invalid fedmsg envelope: {e}")))
    }

    /// Copy the topic into the body map so selectors can reference it
    pub fn with_topic_injected(mut self) -> Self {
        self.msg
            .insert(TOPIC_KEY.to_string(), Value::String(self.topic.clone()));
        self
    }

    /// Two frames: topic, then the JSON envelope
    pub fn to_frames(&self) -> MessagingResult<(Bytes, Bytes)> {
        let json = serde_json::to_vec(self)
            .map_err(|e| MessagingError::decode_failure(format!("cannot encode envelope: {e}")))?;
        Ok((Bytes::from(self.topic.clone()), Bytes::from(json)))
    }

    pub fn into_raw_message(self) -> RawMessage {
        RawMessage {
            headers: TransportHeaders {
                destination: Some(self.topic),
                timestamp: self.timestamp.map(|secs| secs.saturating_mul(1000).to_string()),
                ..Default::default()
            },
            properties: scalar_properties(&self.msg),
            payload: Payload::Map(self.msg),
        }
    }
}

/// String and integer values only; nested maps, lists, floats and booleans are skipped
pub fn scalar_properties(msg: &Map<String, Value>) -> BTreeMap<String, String> {
    msg.iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key.clone(), s.clone())),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some((key.clone(), n.to_string())),
            _ => None,
        })
        .collect()
}
