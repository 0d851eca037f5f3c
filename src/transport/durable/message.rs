//! MESSAGE frame to [`RawMessage`]

use super::super::stomp::Frame;
use crate::message::{Payload, RawMessage, TransportHeaders};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Headers that belong to the protocol rather than to the message properties
const PROTOCOL_HEADERS: &[&str] = &[
    "destination",
    "message-id",
    "subscription",
    "ack",
    "content-length",
    "content-type",
    "transformation",
    "persistent",
    "expires",
    "priority",
    "timestamp",
    "correlation-id",
    "reply-to",
    "redelivered",
    "type",
    "receipt",
];

pub fn raw_message_from_frame(frame: &Frame) -> RawMessage {
    let owned = |name: &str| frame.get(name).map(str::to_string);
    let headers = TransportHeaders {
        destination: owned("destination"),
        persistent: owned("persistent"),
        expires: owned("expires"),
        priority: owned("priority"),
        message_id: owned("message-id"),
        timestamp: owned("timestamp"),
        correlation_id: owned("correlation-id"),
        reply_to: owned("reply-to"),
        redelivered: owned("redelivered"),
        message_type: owned("type"),
    };

    let mut properties = BTreeMap::new();
    for (name, value) in &frame.headers {
        if PROTOCOL_HEADERS.contains(&name.as_str()) {
            continue;
        }
        properties
            .entry(name.clone())
            .or_insert_with(|| value.clone());
    }

    RawMessage {
        headers,
        properties,
        payload: classify_payload(frame),
    }
}

/// Map transformations carry JSON maps; a content-length marks a bytes
/// message; no length marks a text message.
fn classify_payload(frame: &Frame) -> Payload {
    match frame.get("transformation") {
        Some(t) if t.starts_with("jms-map") => {
            let text = String::from_utf8_lossy(&frame.body);
            match parse_map_body(&text) {
                Ok(map) => Payload::Map(map),
                Err(e) => Payload::Unsupported(format!("malformed map message: {e}")),
            }
        }
        Some(other) => Payload::Unsupported(format!("transformation '{other}'")),
        None if frame.get("content-length").is_some() => Payload::Bytes(frame.body.to_vec()),
        None => Payload::Text(String::from_utf8_lossy(&frame.body).into_owned()),
    }
}

/// Accepts either a plain JSON object or the XStream rendering
/// `{"map":{"entry":[{"string":["key","value"]}, {"string":"n","int":1}]}}`
fn parse_map_body(text: &str) -> Result<Map<String, Value>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let Value::Object(object) = value else {
        return Err("map body is not a JSON object".to_string());
    };

    if object.len() != 1 {
        return Ok(object);
    }
    let entries = match object.get("map") {
        Some(Value::Object(inner)) if inner.len() == 1 => match inner.get("entry") {
            Some(Value::Array(items)) => items.clone(),
            Some(single @ Value::Object(_)) => vec![single.clone()],
            Some(other) => return Err(format!("unexpected map entry {other}")),
            None => return Ok(object),
        },
        Some(Value::String(s)) if s.is_empty() => Vec::new(),
        Some(Value::Null) => Vec::new(),
        _ => return Ok(object),
    };

    let mut map = Map::new();
    for entry in &entries {
        let (key, value) =
            flatten_entry(entry).ok_or_else(|| format!("unrecognized map entry {entry}"))?;
        map.insert(key, value);
    }
    Ok(map)
}

fn flatten_entry(entry: &Value) -> Option<(String, Value)> {
    let fields = entry.as_object()?;

    // {"string": ["key", "value"]}: key and value share a type tag.
    if fields.len() == 1 {
        let pair = fields.values().next()?.as_array()?;
        return match pair.as_slice() {
            [key, value] => Some((scalar_text(key)?, value.clone())),
            _ => None,
        };
    }

    // {"string": "key", "int": 5}
    let key = fields.get("string")?.as_str()?.to_string();
    let value = fields
        .iter()
        .find(|(tag, _)| tag.as_str() != "string")
        .map(|(_, v)| v.clone())?;
    Some((key, value))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stomp::Command;
    use serde_json::json;

    fn message(headers: &[(&str, &str)], body: &str) -> Frame {
        headers
            .iter()
            .fold(Frame::new(Command::Message), |f, (k, v)| f.header(*k, *v))
            .body(body.to_string())
    }

    #[test]
    fn test_plain_json_map() {
        let frame = message(
            &[("transformation", "jms-map-json")],
            r#"{"CI_NAME":"my-job","CI_TYPE":"complete"}"#,
        );
        let raw = raw_message_from_frame(&frame);
        match raw.payload {
            Payload::Map(map) => {
                assert_eq!(map["CI_NAME"], json!("my-job"));
                assert_eq!(map["CI_TYPE"], json!("complete"));
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn test_xstream_map_is_flattened() {
        let body = r#"{"map":{"entry":[{"string":["CI_NAME","my-job"]},{"string":"build","int":42}]}}"#;
        let frame = message(&[("transformation", "jms-map-json")], body);
        match raw_message_from_frame(&frame).payload {
            Payload::Map(map) => {
                assert_eq!(map["CI_NAME"], json!("my-job"));
                assert_eq!(map["build"], json!(42));
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn test_xstream_single_entry() {
        let body = r#"{"map":{"entry":{"string":["k","v"]}}}"#;
        let frame = message(&[("transformation", "jms-map-json")], body);
        assert_eq!(
            raw_message_from_frame(&frame).payload,
            Payload::Map(json!({"k": "v"}).as_object().unwrap().clone())
        );
    }

    #[test]
    fn test_empty_xstream_map() {
        let frame = message(&[("transformation", "jms-map-json")], r#"{"map":""}"#);
        assert_eq!(raw_message_from_frame(&frame).payload, Payload::Map(Map::new()));
    }

    #[test]
    fn test_plain_map_with_single_map_key_is_kept() {
        let body = r#"{"map":{"CI_NAME":"my-job","build":42}}"#;
        let frame = message(&[("transformation", "jms-map-json")], body);
        assert_eq!(
            raw_message_from_frame(&frame).payload,
            Payload::Map(
                json!({"map": {"CI_NAME": "my-job", "build": 42}})
                    .as_object()
                    .unwrap()
                    .clone()
            )
        );

        let frame = message(&[("transformation", "jms-map-json")], r#"{"map":"value"}"#);
        assert_eq!(
            raw_message_from_frame(&frame).payload,
            Payload::Map(json!({"map": "value"}).as_object().unwrap().clone())
        );
    }

    #[test]
    fn test_text_and_bytes() {
        let text = message(&[], "plain text");
        assert_eq!(
            raw_message_from_frame(&text).payload,
            Payload::Text("plain text".to_string())
        );

        let bytes = message(&[("content-length", "3")], "abc");
        assert_eq!(
            raw_message_from_frame(&bytes).payload,
            Payload::Bytes(b"abc".to_vec())
        );
    }

    #[test]
    fn test_unknown_transformation_is_unsupported() {
        let frame = message(&[("transformation", "jms-object-json")], "{}");
        assert!(matches!(
            raw_message_from_frame(&frame).payload,
            Payload::Unsupported(_)
        ));
    }

    #[test]
    fn test_malformed_map_is_unsupported() {
        let frame = message(&[("transformation", "jms-map-json")], "[1,2]");
        assert!(matches!(
            raw_message_from_frame(&frame).payload,
            Payload::Unsupported(_)
        ));
    }

    #[test]
    fn test_headers_and_properties_split() {
        let frame = message(
            &[
                ("destination", "/topic/CI"),
                ("message-id", "ID:1"),
                ("subscription", "sub-0"),
                ("priority", "4"),
                ("type", "application/json"),
                ("CI_NAME", "my-job"),
                ("CI_STATUS", "passed"),
            ],
            "",
        );
        let raw = raw_message_from_frame(&frame);
        assert_eq!(raw.headers.destination.as_deref(), Some("/topic/CI"));
        assert_eq!(raw.headers.message_id.as_deref(), Some("ID:1"));
        assert_eq!(raw.headers.message_type.as_deref(), Some("application/json"));
        assert_eq!(raw.properties.len(), 2);
        assert_eq!(raw.properties["CI_NAME"], "my-job");
        assert_eq!(raw.properties["CI_STATUS"], "passed");
    }
}
