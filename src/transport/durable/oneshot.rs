//! Short-lived connections for outbound publish and ad hoc waits

use super::message::raw_message_from_frame;
use super::{local_ip, topic_destination, JSON_TYPE, MAP_TRANSFORMATION};
use crate::config::{DurableTopicProvider, RetryTiming};
use crate::error::{sanitize_error_message, MessagingError, MessagingResult};
use crate::message::{normalize, OutboundMessage};
use crate::transport::stomp::{Command, ConnectOptions, Frame, StompConnection};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

fn require_topic(provider: &DurableTopicProvider) -> MessagingResult<&str> {
    provider.topic().ok_or_else(|| {
        MessagingError::configuration_missing(format!(
            "provider '{}' has no topic configured",
            provider.name
        ))
    })
}

async fn open(
    provider: &DurableTopicProvider,
    client_id: Option<String>,
    timing: &RetryTiming,
) -> MessagingResult<StompConnection> {
    let mut options = ConnectOptions::from_url(&provider.broker_url, timing.connect_timeout)?
        .with_credentials(provider.credentials());
    if let Some(client_id) = client_id {
        options = options.with_client_id(client_id);
    }
    Ok(StompConnection::connect(&options).await?)
}

async fn close(connection: StompConnection, timing: &RetryTiming) {
    match tokio::time::timeout(timing.connect_timeout, connection.disconnect()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Error closing publish connection"),
        Err(_) => debug!("Timed out closing publish connection"),
    }
}

fn send_frame(topic: &str, message: &OutboundMessage) -> Frame {
    let mut frame = Frame::new(Command::Send)
        .header("destination", topic_destination(topic))
        .header("type", JSON_TYPE);
    for (name, value) in &message.properties {
        frame = frame.header(name.clone(), value.clone());
    }
    frame.body(message.content.clone())
}

/// Publish one message on the provider's topic over a fresh connection
pub async fn send_message(
    provider: &DurableTopicProvider,
    message: &OutboundMessage,
    timing: &RetryTiming,
) -> MessagingResult<()> {
    let topic = require_topic(provider)?;
    let mut connection = open(provider, None, timing).await?;

    let result = connection.request(send_frame(topic, message)).await;
    close(connection, timing).await;
    result?;

    info!(
        provider = %provider.name,
        topic = %topic,
        broker = %sanitize_error_message(&provider.broker_url),
        "Sent message"
    );
    Ok(())
}

/// Block until a message matching `selector` arrives or `timeout` elapses.
///
/// Uses a non-durable subscription, so only messages published after the
/// subscription is confirmed are seen. Returns the decoded body.
pub async fn wait_for_message(
    provider: &DurableTopicProvider,
    selector: &str,
    timeout: Duration,
    timing: &RetryTiming,
) -> MessagingResult<Option<String>> {
    let topic = require_topic(provider)?;
    crate::selector::Selector::parse(selector)?;

    let ip = local_ip()
        .await
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let client_id = format!("{}_{}", ip, Uuid::new_v4());
    let mut connection = open(provider, Some(client_id), timing).await?;

    let mut subscribe = Frame::new(Command::Subscribe)
        .header("id", "wait-0")
        .header("destination", topic_destination(topic))
        .header("ack", "auto")
        .header("transformation", MAP_TRANSFORMATION);
    if !selector.trim().is_empty() {
        subscribe = subscribe.header("selector", selector);
    }
    if let Err(e) = connection.request(subscribe).await {
        close(connection, timing).await;
        return Err(e.into());
    }

    info!(
        provider = %provider.name,
        topic = %topic,
        selector = %selector,
        timeout_secs = timeout.as_secs(),
        "Waiting for message"
    );

    let outcome = tokio::time::timeout(timeout, connection.next_message()).await;
    close(connection, timing).await;

    match outcome {
        Ok(Ok(frame)) => {
            let normalized = normalize(&raw_message_from_frame(&frame));
            info!(provider = %provider.name, "Received matching message");
            Ok(Some(normalized.body))
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            info!(
                provider = %provider.name,
                selector = %selector,
                "Timed out waiting for message"
            );
            Ok(None)
        }
    }
}
