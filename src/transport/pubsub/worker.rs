use super::envelope::Envelope;
use super::{message_frames, require_hub};
use crate::config::{PubSubProvider, RetryTiming};
use crate::error::{sanitize_error_message, MessagingError, MessagingResult};
use crate::message::{format_diagnostic, normalize};
use crate::observability::metrics;
use crate::selector::Selector;
use crate::transport::{
    deadline_after, CancelSignal, InterruptHook, MessagingWorker, WorkerState,
};
use crate::trigger::TriggerCallback;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use zeromq::{Socket, SocketRecv, SubSocket};

/// What one poll slice produced
enum Slice {
    Matched(Envelope),
    Skipped,
    Idle,
    Stopped,
}

pub struct PubSubWorker {
    provider: PubSubProvider,
    job_name: String,
    callback: Arc<dyn TriggerCallback>,
    timing: RetryTiming,
    socket: Option<SubSocket>,
    subscribed_topic: Option<String>,
    selector: Selector,
    interrupt: Arc<AtomicBool>,
    state: WorkerState,
}

impl PubSubWorker {
    pub fn new(
        provider: PubSubProvider,
        job_name: &str,
        callback: Arc<dyn TriggerCallback>,
        timing: RetryTiming,
    ) -> Self {
        Self {
            provider,
            job_name: job_name.to_string(),
            callback,
            timing,
            socket: None,
            subscribed_topic: None,
            selector: Selector::match_all(),
            interrupt: Arc::new(AtomicBool::new(false)),
            state: WorkerState::Disconnected,
        }
    }

    async fn open_socket(&self) -> MessagingResult<SubSocket> {
        let hub = require_hub(self.provider.hub_addr.as_deref(), &self.provider.name)?;
        let mut socket = SubSocket::new();
        tokio::time::timeout(self.timing.connect_timeout, socket.connect(&hub))
            .await
            .map_err(|_| MessagingError::transport_failed(format!("timed out connecting to {hub}")))?
            .map_err(MessagingError::transport_unavailable)?;
        Ok(socket)
    }

    async fn try_subscribe(
        &mut self,
        job_name: &str,
        topic: &str,
        selector: &str,
    ) -> MessagingResult<()> {
        if self.socket.is_some() && self.subscribed_topic.is_some() {
            info!(
                job = %job_name,
                topic = %topic,
                selector = %selector,
                "Already subscribed"
            );
            return Ok(());
        }

        self.selector = Selector::parse(selector)?;

        if !self.is_connected() && !self.connect().await {
            return Err(MessagingError::transport_failed(format!(
                "unable to connect to hub {}",
                self.provider.hub_addr.as_deref().unwrap_or_default()
            )));
        }
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| MessagingError::transport_failed("socket lost before subscribe"))?;

        info!(job = %job_name, topic = %topic, "Subscribing job to topic prefix");
        socket
            .subscribe(topic)
            .await
            .map_err(MessagingError::transport_unavailable)?;

        self.subscribed_topic = Some(topic.to_string());
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

    /// Wait at most one slice for a frame and run it through the selector
    async fn poll_slice(
        &mut self,
        job_name: &str,
        slice: Duration,
        cancel: &CancelSignal,
    ) -> MessagingResult<Slice> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| MessagingError::transport_failed("receive without a socket"))?;

        let received = tokio::select! {
            result = tokio::time::timeout(slice, socket.recv()) => result,
            _ = cancel.cancelled() => return Ok(Slice::Stopped),
        };

        let message = match received {
            Err(_) => return Ok(Slice::Idle),
            Ok(result) => result.map_err(MessagingError::transport_unavailable)?,
        };

        metrics().message_received();
        let envelope = Envelope::from_frames(&message_frames(message))
            .map_err(|e| {
                metrics().decode_failed();
                e
            })?
            .with_topic_injected();

        debug!(job = %job_name, selector = %self.selector, "Evaluating selector");
        if self.selector.matches(&envelope.msg) {
            Ok(Slice::Matched(envelope))
        } else {
            metrics().message_filtered();
            debug!(job = %job_name, topic = %envelope.topic, "Message did not match selector");
            Ok(Slice::Skipped)
        }
    }

    fn process(&self, job_name: &str, envelope: Envelope) {
        let raw = envelope.into_raw_message();
        let normalized = normalize(&raw);
        let diagnostic = format_diagnostic(&raw);
        metrics().message_matched();
        debug!(job = %job_name, "Triggering job from message");
        self.callback
            .on_message(job_name, &diagnostic, &normalized.properties);
    }

    fn take_interrupt(&self) -> bool {
        self.interrupt.swap(false, Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingWorker for PubSubWorker {
    fn job_name(&self) -> &str {
        &self.job_name
    }

    async fn connect(&mut self) -> bool {
        if self.socket.is_some() {
            return true;
        }
        self.state = WorkerState::Connecting;
        match self.open_socket().await {
            Ok(socket) => {
                debug!(job = %self.job_name, provider = %self.provider.name, "Hub socket connected");
                self.socket = Some(socket);
                true
            }
            Err(e) => {
                error!(
                    job = %self.job_name,
                    provider = %self.provider.name,
                    error = %sanitize_error_message(&e.to_string()),
                    "Unable to connect to hub"
                );
                self.state = WorkerState::Disconnected;
                false
            }
        }
    }

    async fn subscribe(&mut self, job_name: &str, selector: &str, cancel: &CancelSignal) -> bool {
        let Some(topic) = self.provider.effective_topic().map(str::to_string) else {
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
        if self.socket.is_none() {
            warn!(job = %job_name, "Receive called without a live subscription");
            return;
        }

        let deadline = deadline_after(timeout);
        self.state = WorkerState::Waiting { deadline };
        let slice_length = self.timing.poll_slice.max(Duration::from_millis(1));

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if self.interrupt.load(Ordering::SeqCst) || cancel.is_cancelled() {
                info!(job = %job_name, "Receive interrupted");
                self.take_interrupt();
                self.state = WorkerState::ShuttingDown;
                return;
            }

            let slice = slice_length.min(deadline - now);
            match self.poll_slice(job_name, slice, cancel).await {
                Ok(Slice::Matched(envelope)) => {
                    self.state = WorkerState::Processing;
                    self.process(job_name, envelope);
                    self.state = WorkerState::Subscribed;
                    return;
                }
                Ok(Slice::Skipped) | Ok(Slice::Idle) => {}
                Ok(Slice::Stopped) => {
                    self.take_interrupt();
                    self.state = WorkerState::ShuttingDown;
                    return;
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        self.state = WorkerState::ShuttingDown;
                        return;
                    }
                    metrics().transport_error();
                    warn!(
                        job = %job_name,
                        error = %sanitize_error_message(&e.to_string()),
                        "Error while receiving; re-subscribing job"
                    );
                    self.state = WorkerState::Errored;
                    self.unsubscribe(job_name).await;
                    return;
                }
            }
        }

        if self.take_interrupt() {
            self.state = WorkerState::ShuttingDown;
            return;
        }
        metrics().receive_timed_out();
        info!(
            job = %job_name,
            timeout_ms = timeout.as_millis() as u64,
            "No message received in the receive window; re-subscribing job"
        );
        self.state = WorkerState::TimedOut;
        self.unsubscribe(job_name).await;
    }

    async fn unsubscribe(&mut self, job_name: &str) {
        if let Some(topic) = self.subscribed_topic.take() {
            info!(job = %job_name, topic = %topic, "Unsubscribing job from topic");
        }
        self.disconnect().await;
        self.state = WorkerState::Disconnected;
    }

    async fn disconnect(&mut self) {
        // The subscription lives on the socket, so it goes with it.
        if self.socket.take().is_some() {
            debug!(job = %self.job_name, "Hub socket closed");
        }
        self.subscribed_topic = None;
        if !matches!(self.state, WorkerState::ShuttingDown) {
            self.state = WorkerState::Disconnected;
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn interrupt_hook(&self) -> InterruptHook {
        InterruptHook::new(Arc::clone(&self.interrupt))
    }

    fn state(&self) -> WorkerState {
        self.state
    }
}
