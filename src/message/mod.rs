//! Wire-independent message model
//!
//! Backends decode their frames into a [`RawMessage`]; the normalizer turns
//! that into the body text and flat property map handed to trigger callbacks,
//! and the formatter renders the diagnostic dump that accompanies them.

pub mod format;
pub mod normalize;

use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub use format::format_diagnostic;
pub use normalize::{decode_body, normalize, CI_MESSAGE};

/// Transport headers as received; values are kept as wire text and parsed
/// only when rendered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportHeaders {
    pub destination: Option<String>,
    pub persistent: Option<String>,
    pub expires: Option<String>,
    pub priority: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub redelivered: Option<String>,
    pub message_type: Option<String>,
}

impl TransportHeaders {
    pub fn is_empty(&self) -> bool {
        *self == TransportHeaders::default()
    }
}

/// Message body in the shape it arrived in
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured key/value map
    Map(Map<String, Value>),
    Text(String),
    Bytes(Vec<u8>),
    /// A payload we cannot decode; carries a description for logs
    Unsupported(String),
}

/// A message decoded from the wire, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub headers: TransportHeaders,
    pub properties: BTreeMap<String, String>,
    pub payload: Payload,
}

impl RawMessage {
    pub fn new(payload: Payload) -> Self {
        Self {
            headers: TransportHeaders::default(),
            properties: BTreeMap::new(),
            payload,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// A fully substituted message ready to be sent by either backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    pub properties: BTreeMap<String, String>,
    pub content: String,
}

/// Body plus flat properties; always carries `CI_MESSAGE`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedMessage {
    pub body: String,
    pub properties: std::collections::HashMap<String, String>,
}
