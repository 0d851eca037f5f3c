//! Long-lived durable subscriber for one job

use super::message::raw_message_from_frame;
use super::{local_ip, topic_destination, MAP_TRANSFORMATION};
use crate::config::{DurableTopicProvider, RetryTiming};
use crate::error::{sanitize_error_message, MessagingError, MessagingResult};
use crate::message::{format_diagnostic, normalize};
use crate::observability::metrics;
use crate::selector::Selector;
use crate::transport::stomp::{Command, ConnectOptions, Frame, StompConnection};
use crate::transport::{
    deadline_after, CancelSignal, InterruptHook, MessagingWorker, WorkerState,
};
use crate::trigger::TriggerCallback;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Upper bound on a graceful DISCONNECT during teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DurableTopicWorker {
    provider: DurableTopicProvider,
    job_name: String,
    callback: Arc<dyn TriggerCallback>,
    timing: RetryTiming,
    connection: Option<StompConnection>,
    subscription_id: Option<String>,
    state: WorkerState,
}

impl DurableTopicWorker {
    pub fn new(
        provider: DurableTopicProvider,
        job_name: &str,
        callback: Arc<dyn TriggerCallback>,
        timing: RetryTiming,
    ) -> Self {
        Self {
            provider,
            job_name: job_name.to_string(),
            callback,
            timing,
            connection: None,
            subscription_id: None,
            state: WorkerState::Disconnected,
        }
    }

    /// `<provider>_<base url>_<local ip>_<job>`
    async fn client_id(&self) -> String {
        let ip = match local_ip().await {
            Some(ip) => ip.to_string(),
            None => {
                error!(job = %self.job_name, "Unable to determine local IP address");
                "unknown".to_string()
            }
        };
        format!(
            "{}_{}_{}_{}",
            self.provider.name,
            self.provider.base_url.as_deref().unwrap_or_default(),
            ip,
            self.job_name
        )
    }

    async fn open_connection(&self) -> MessagingResult<StompConnection> {
        let options =
            ConnectOptions::from_url(&self.provider.broker_url, self.timing.connect_timeout)?
                .with_credentials(self.provider.credentials())
                .with_client_id(self.client_id().await);
        Ok(StompConnection::connect(&options).await?)
    }

    async fn try_subscribe(
        &mut self,
        job_name: &str,
        topic: &str,
        selector: &str,
    ) -> MessagingResult<()> {
        if self.connection.is_some() && self.subscription_id.is_some() {
            debug!(job = %job_name, topic = %topic, selector = %selector, "Already subscribed");
            return Ok(());
        }

        // Reject a malformed selector before the broker sees it.
        Selector::parse(selector)?;

        if !self.is_connected() && !self.connect().await {
            return Err(MessagingError::transport_failed(format!(
                "unable to connect to {}",
                sanitize_error_message(&self.provider.broker_url)
            )));
        }
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| MessagingError::transport_failed("connection lost before subscribe"))?;

        info!(job = %job_name, topic = %topic, "Subscribing job to topic");
        let subscription_id = format!("{job_name}-durable");
        let mut frame = Frame::new(Command::Subscribe)
            .header("id", subscription_id.clone())
            .header("destination", topic_destination(topic))
            .header("ack", "auto")
            .header("activemq.subscriptionName", job_name)
            .header("transformation", MAP_TRANSFORMATION);
        if !selector.trim().is_empty() {
            frame = frame.header("selector", selector);
        }
        connection.request(frame).await?;

        self.subscription_id = Some(subscription_id);
        self.state = WorkerState::Subscribed;
        metrics().subscription_established();
        info!(
            job = %job_name,
            topic = %topic,
            selector = %selector,
            "Successfully subscribed job to topic"
        );
        Ok(())
    }

    fn process(&self, job_name: &str, frame: &Frame) {
        let raw = raw_message_from_frame(frame);
        let normalized = normalize(&raw);
        let diagnostic = format_diagnostic(&raw);
        metrics().message_matched();
        debug!(job = %job_name, "Triggering job from message");
        self.callback
            .on_message(job_name, &diagnostic, &normalized.properties);
    }
}

#[async_trait]
impl MessagingWorker for DurableTopicWorker {
    fn job_name(&self) -> &str {
        &self.job_name
    }

    async fn connect(&mut self) -> bool {
        if self.connection.is_some() {
            return true;
        }
        self.state = WorkerState::Connecting;
        match self.open_connection().await {
            Ok(connection) => {
                info!(
                    job = %self.job_name,
                    provider = %self.provider.name,
                    session = ?connection.session(),
                    "Connection started"
                );
                self.connection = Some(connection);
                true
            }
            Err(e) => {
                error!(
                    job = %self.job_name,
                    broker = %sanitize_error_message(&self.provider.broker_url),
                    error = %sanitize_error_message(&e.to_string()),
                    "Unable to connect to broker"
                );
                self.state = WorkerState::Disconnected;
                false
            }
        }
    }

    async fn subscribe(&mut self, job_name: &str, selector: &str, cancel: &CancelSignal) -> bool {
        let Some(topic) = self.provider.topic().map(str::to_string) else {
            error!(
                job = %job_name,
                provider = %self.provider.name,
                "No topic configured; cannot subscribe"
            );
            return false;
        };

        while !cancel.is_cancelled() {
            let attempt = tokio::select! {
                result = self.try_subscribe(job_name, &topic, selector) => result,
                _ = cancel.cancelled() => Err(MessagingError::Cancelled),
            };

            match attempt {
                Ok(()) => return true,
                Err(e) if e.is_cancellation() || cancel.is_cancelled() => break,
                Err(e) => {
                    metrics().subscribe_failed();
                    error!(
                        job = %job_name,
                        error = %sanitize_error_message(&e.to_string()),
                        retry_in_secs = self.timing.subscribe_retry.as_secs(),
                        "Failed to subscribe job; retrying"
                    );
                    self.unsubscribe(job_name).await;
                    cancel.sleep(self.timing.subscribe_retry).await;
                }
            }
        }
        false
    }

    async fn receive(&mut self, job_name: &str, timeout: Duration, cancel: &CancelSignal) {
        if cancel.is_cancelled() {
            return;
        }
        let Some(connection) = self.connection.as_mut() else {
            warn!(job = %job_name, "Receive called without a live subscription");
            return;
        };

        let deadline = deadline_after(timeout);
        self.state = WorkerState::Waiting { deadline };

        let outcome = tokio::select! {
            result = tokio::time::timeout_at(deadline, connection.next_message()) => Some(result),
            _ = cancel.cancelled() => None,
        };

        match outcome {
            None => {
                debug!(job = %job_name, "Receive interrupted by stop request");
                self.state = WorkerState::ShuttingDown;
            }
            Some(Ok(Ok(frame))) => {
                metrics().message_received();
                self.state = WorkerState::Processing;
                self.process(job_name, &frame);
                self.state = WorkerState::Subscribed;
            }
            Some(Err(_elapsed)) => {
                metrics().receive_timed_out();
                info!(
                    job = %job_name,
                    timeout_ms = timeout.as_millis() as u64,
                    "No message received in the receive window; re-subscribing job"
                );
                self.state = WorkerState::TimedOut;
                self.unsubscribe(job_name).await;
            }
            Some(Ok(Err(e))) => {
                if cancel.is_cancelled() {
                    self.state = WorkerState::ShuttingDown;
                    return;
                }
                metrics().transport_error();
                warn!(
                    job = %job_name,
                    error = %sanitize_error_message(&e.to_string()),
                    "Transport error while receiving; re-subscribing job"
                );
                self.state = WorkerState::Errored;
                self.unsubscribe(job_name).await;
            }
        }
    }

    async fn unsubscribe(&mut self, job_name: &str) {
        if self.connection.is_some() || self.subscription_id.is_some() {
            info!(job = %job_name, "Unsubscribing job from topic");
        }
        self.disconnect().await;
        self.subscription_id = None;
        self.state = WorkerState::Disconnected;
    }

    async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, connection.disconnect()).await {
                Ok(Ok(())) => debug!(job = %self.job_name, "Broker connection closed"),
                Ok(Err(e)) => debug!(job = %self.job_name, error = %e, "Error closing broker connection"),
                Err(_) => debug!(job = %self.job_name, "Timed out closing broker connection"),
            }
        }
        if !matches!(self.state, WorkerState::ShuttingDown) {
            self.state = WorkerState::Disconnected;
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn interrupt_hook(&self) -> InterruptHook {
        InterruptHook::none()
    }

    fn state(&self) -> WorkerState {
        self.state
    }
}
