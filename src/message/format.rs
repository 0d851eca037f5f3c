//! Human-readable message dump for logs and trigger causes
//!
//! Headers render in a fixed order, then properties, then the body. A header
//! that fails to parse is logged and left out; it never aborts the dump.

use super::{Payload, RawMessage, TransportHeaders};
use chrono::{DateTime, SecondsFormat};
use std::fmt::Write;
use tracing::warn;

pub fn format_diagnostic(raw: &RawMessage) -> String {
    let mut out = String::new();

    if !raw.headers.is_empty() {
        out.push_str("Message Headers:\n");
        out.push_str(&format_headers(&raw.headers));
    }

    out.push_str("Message Properties:\n");
    for (name, value) in &raw.properties {
        let _ = writeln!(out, "  {name}: {value}");
    }

    out.push_str("Message Content:\n");
    match &raw.payload {
        Payload::Map(map) => {
            match serde_json::to_string_pretty(&serde_json::Value::Object(map.clone())) {
                Ok(pretty) => out.push_str(&pretty),
                Err(e) => warn!(error = %e, "Unable to render map content"),
            }
        }
        Payload::Text(text) => out.push_str(text),
        Payload::Bytes(bytes) => out.push_str(&String::from_utf8_lossy(bytes)),
        Payload::Unsupported(what) => {
            let _ = write!(out, "  Unhandled message type: {what}");
        }
    }

    out
}

fn format_headers(headers: &TransportHeaders) -> String {
    let mut out = String::new();

    push_header(&mut out, "destination", headers.destination.as_deref(), |v| {
        Ok(v.to_string())
    });
    push_header(&mut out, "delivery mode", headers.persistent.as_deref(), |v| {
        match v.trim().to_ascii_lowercase().as_str() {
            "true" | "persistent" | "2" => Ok("persistent".to_string()),
            "false" | "non-persistent" | "1" => Ok("non-persistent".to_string()),
            other => Err(format!("unknown delivery mode '{other}'")),
        }
    });
    push_header(&mut out, "expiration", headers.expires.as_deref(), render_epoch_millis);
    push_header(&mut out, "priority", headers.priority.as_deref(), |v| {
        v.trim()
            .parse::<u8>()
            .map(|p| p.to_string())
            .map_err(|e| e.to_string())
    });
    push_header(&mut out, "message id", headers.message_id.as_deref(), |v| {
        Ok(v.to_string())
    });
    push_header(&mut out, "timestamp", headers.timestamp.as_deref(), render_epoch_millis);
    push_header(
        &mut out,
        "correlation id",
        headers.correlation_id.as_deref(),
        |v| Ok(v.to_string()),
    );
    push_header(&mut out, "reply-to", headers.reply_to.as_deref(), |v| {
        Ok(v.to_string())
    });
    push_header(&mut out, "redelivered", headers.redelivered.as_deref(), |v| {
        v.trim()
            .parse::<bool>()
            .map(|b| b.to_string())
            .map_err(|e| e.to_string())
    });
    push_header(&mut out, "type", headers.message_type.as_deref(), |v| {
        Ok(v.to_string())
    });

    out
}

fn push_header<F>(out: &mut String, label: &str, value: Option<&str>, render: F)
where
    F: FnOnce(&str) -> Result<String, String>,
{
    let Some(value) = value else {
        return;
    };
    match render(value) {
        Ok(rendered) => {
            let _ = writeln!(out, "  {label}: {rendered}");
        }
        Err(e) => warn!(header = label, error = %e, "Unable to render message header"),
    }
}

/// Epoch milliseconds as RFC 3339; zero means "not set"
fn render_epoch_millis(value: &str) -> Result<String, String> {
    let millis: i64 = value.trim().parse().map_err(|e| format!("{e}"))?;
    if millis == 0 {
        return Ok("0".to_string());
    }
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| format!("timestamp {millis} out of range"))
}
