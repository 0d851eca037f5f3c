//! Raw message to body text and property map

use super::{NormalizedMessage, Payload, RawMessage};
use crate::error::{MessagingError, MessagingResult};
use serde_json::Value;
use tracing::warn;

/// Property carrying the decoded body
pub const CI_MESSAGE: &str = "CI_MESSAGE";

/// Decode a payload to text. Maps become a compact JSON object with sorted
/// keys, bytes are read as UTF-8 with replacement.
pub fn decode_body(payload: &Payload) -> MessagingResult<String> {
    match payload {
        Payload::Map(map) => serde_json::to_string(&Value::Object(map.clone()))
            .map_err(|e| MessagingError::decode_failure(format!("map payload: {e}"))),
        Payload::Text(text) => Ok(text.clone()),
        Payload::Bytes(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        Payload::Unsupported(what) => Err(MessagingError::decode_failure(format!(
            "unsupported message type: {what}"
        ))),
    }
}

/// Normalize a raw message. An undecodable payload is logged and yields an
/// empty body; wire properties are copied and `CI_MESSAGE` is set last.
pub fn normalize(raw: &RawMessage) -> NormalizedMessage {
    let body = decode_body(&raw.payload).unwrap_or_else(|e| {
        warn!(error = %e, "Could not decode message body");
        String::new()
    });

    let mut properties: std::collections::HashMap<String, String> = raw
        .properties
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    properties.insert(CI_MESSAGE.to_string(), body.clone());

    NormalizedMessage { body, properties }
}
