//! Independent sockets for outbound publish and ad hoc waits

use super::envelope::{Envelope, CONTENT_KEY};
use super::{message_frames, multipart, require_hub};
use crate::config::{PubSubProvider, RetryTiming, DEFAULT_PUBSUB_TOPIC};
use crate::error::{MessagingError, MessagingResult};
use crate::message::{decode_body, OutboundMessage, Payload};
use crate::selector::Selector;
use crate::transport::deadline_after;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};
use zeromq::{PubSocket, Socket, SocketRecv, SocketSend, SubSocket};

fn publish_topic(provider: &PubSubProvider) -> &str {
    provider.effective_topic().unwrap_or(DEFAULT_PUBSUB_TOPIC)
}

/// Build the envelope for an outbound message; content goes under `message-content`
pub fn outbound_envelope(topic: &str, message: &OutboundMessage, timestamp: i64) -> Envelope {
    let mut msg: Map<String, Value> = message
        .properties
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    msg.insert(CONTENT_KEY.to_string(), Value::String(message.content.clone()));
    Envelope {
        topic: topic.to_string(),
        msg,
        timestamp: Some(timestamp),
    }
}

/// Publish one message through a fresh PUB socket.
///
/// PUB sockets drop messages sent before subscribers have connected, so the
/// socket waits `publish_settle` before sending.
pub async fn send_message(
    provider: &PubSubProvider,
    message: &OutboundMessage,
    timing: &RetryTiming,
) -> MessagingResult<()> {
    let addr = provider
        .pub_addr
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| {
            MessagingError::configuration_missing(format!(
                "provider '{}' has no publish address configured",
                provider.name
            ))
        })?;

    let mut socket = PubSocket::new();
    tokio::time::timeout(timing.connect_timeout, socket.connect(addr))
        .await
        .map_err(|_| MessagingError::transport_failed(format!("timed out connecting to {addr}")))?
        .map_err(MessagingError::transport_unavailable)?;
    debug!(provider = %provider.name, pub_addr = %addr, "Publish socket connected");
    tokio::time::sleep(timing.publish_settle).await;

    let envelope = outbound_envelope(
        publish_topic(provider),
        message,
        chrono::Utc::now().timestamp(),
    );
    let (topic, payload) = envelope.to_frames()?;
    socket
        .send(multipart(topic, payload))
        .await
        .map_err(MessagingError::transport_unavailable)?;

    info!(provider = %provider.name, topic = %envelope.topic, "Sent message");
    Ok(())
}

/// Poll a fresh SUB socket until a message matches `selector` or `timeout`
/// elapses. Returns the JSON body of the first match.
pub async fn wait_for_message(
    provider: &PubSubProvider,
    selector: &str,
    timeout: Duration,
    timing: &RetryTiming,
) -> MessagingResult<Option<String>> {
    let selector = Selector::parse(selector)?;
    let hub = require_hub(provider.hub_addr.as_deref(), &provider.name)?;
    let topic = publish_topic(provider);

    let mut socket = SubSocket::new();
    tokio::time::timeout(timing.connect_timeout, socket.connect(&hub))
        .await
        .map_err(|_| MessagingError::transport_failed(format!("timed out connecting to {hub}")))?
        .map_err(MessagingError::transport_unavailable)?;
    socket
        .subscribe(topic)
        .await
        .map_err(MessagingError::transport_unavailable)?;

    info!(
        provider = %provider.name,
        topic = %topic,
        selector = %selector,
        timeout_secs = timeout.as_secs(),
        "Waiting for message"
    );

    let deadline = deadline_after(timeout);
    loop {
        let message = match tokio::time::timeout_at(deadline, socket.recv()).await {
            Err(_) => break,
            Ok(result) => result.map_err(MessagingError::transport_unavailable)?,
        };
        let envelope = Envelope::from_frames(&message_frames(message))?.with_topic_injected();
        if !selector.matches(&envelope.msg) {
            debug!(topic = %envelope.topic, "Message did not match selector");
            continue;
        }
        info!(provider = %provider.name, topic = %envelope.topic, "Received matching message");
        return decode_body(&Payload::Map(envelope.msg)).map(Some);
    }

    info!(provider = %provider.name, selector = %selector, "Timed out waiting for message");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(topic: Option<&str>) -> PubSubProvider {
        PubSubProvider {
            name: "fedmsg".to_string(),
            hub_addr: None,
            pub_addr: None,
            topic: topic.map(str::to_string),
        }
    }

    #[test]
    fn test_publish_topic_falls_back_to_default() {
        assert_eq!(publish_topic(&provider(None)), "org.fedoraproject");
        assert_eq!(publish_topic(&provider(Some(""))), "org.fedoraproject");
        assert_eq!(publish_topic(&provider(Some("org.centos.ci"))), "org.centos.ci");
    }

    #[test]
    fn test_outbound_envelope_layout() {
        let mut message = OutboundMessage {
            content: "build finished".to_string(),
            ..Default::default()
        };
        message
            .properties
            .insert("CI_NAME".to_string(), "my-job".to_string());

        let envelope = outbound_envelope("org.centos.ci", &message, 1_700_000_000);
        assert_eq!(envelope.topic, "org.centos.ci");
        assert_eq!(envelope.timestamp, Some(1_700_000_000));
        assert_eq!(envelope.msg["CI_NAME"], json!("my-job"));
        assert_eq!(envelope.msg["message-content"], json!("build finished"));
    }

    #[tokio::test]
    async fn test_send_without_pub_addr_is_configuration_error() {
        let err = send_message(
            &provider(Some("")),
            &OutboundMessage::default(),
            &RetryTiming::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_wait_rejects_bad_selector() {
        let err = wait_for_message(
            &provider(Some("")),
            "CI_NAME = ",
            Duration::from_secs(1),
            &RetryTiming::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MessagingError::Selector(_)));
    }
}
