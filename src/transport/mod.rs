//! Transport layer for message-bus listeners
//!
//! A [`MessagingWorker`] owns the connection for exactly one job subscription
//! and is driven by a trigger loop through repeated subscribe/receive cycles.
//! Two implementations exist: a durable-topic broker worker and a socket
//! pub/sub worker. [`create_worker`] picks one from the provider config.

use crate::config::{ProviderConfig, RetryTiming};
use crate::trigger::TriggerCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub mod cancel;
pub mod durable;
pub mod pubsub;
pub mod stomp;

pub use cancel::CancelSignal;

/// Which wire backend a provider uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    DurableTopic,
    PubSub,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::DurableTopic => write!(f, "durable-topic"),
            BackendKind::PubSub => write!(f, "pub-sub"),
        }
    }
}

/// Lifecycle of a worker's subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Subscribed,
    Waiting { deadline: Instant },
    Processing,
    TimedOut,
    Errored,
    ShuttingDown,
}

impl WorkerState {
    pub fn is_subscribed(&self) -> bool {
        matches!(
            self,
            WorkerState::Subscribed | WorkerState::Waiting { .. } | WorkerState::Processing
        )
    }
}

/// Lets a stop request reach a receive loop that is not natively interruptible
///
/// Workers that poll hand out a hook wrapping their interrupt flag; others hand
/// out an empty hook whose [`prepare`](InterruptHook::prepare) does nothing.
#[derive(Debug, Clone, Default)]
pub struct InterruptHook(Option<Arc<AtomicBool>>);

impl InterruptHook {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self(Some(flag))
    }

    /// Called right before cancellation is issued
    pub fn prepare(&self) {
        if let Some(flag) = &self.0 {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

/// One job's connection to a message bus
///
/// `connect` and `subscribe` report failure as `false` after logging the cause;
/// `receive`, `unsubscribe` and `disconnect` never fail across this boundary.
/// `unsubscribe` is idempotent and safe before any successful `connect`.
#[async_trait::async_trait]
pub trait MessagingWorker: Send {
    fn job_name(&self) -> &str;

    /// Establish the transport resource
    async fn connect(&mut self) -> bool;

    /// Ensure a live subscription, retrying on failure until cancelled.
    /// Returns false only when cancelled or when the provider has no topic.
    async fn subscribe(&mut self, job_name: &str, selector: &str, cancel: &CancelSignal) -> bool;

    /// Wait up to `timeout` for a matching message and hand it to the trigger callback
    async fn receive(&mut self, job_name: &str, timeout: Duration, cancel: &CancelSignal);

    /// Release the subscription and the connection
    async fn unsubscribe(&mut self, job_name: &str);

    /// Release only the connection
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn interrupt_hook(&self) -> InterruptHook;

    fn state(&self) -> WorkerState;
}

/// Deadline `timeout` from now, clamped far into the future when the sum overflows
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Build the worker for `provider`, bound to `job_name`
pub fn create_worker(
    provider: &ProviderConfig,
    job_name: &str,
    callback: Arc<dyn TriggerCallback>,
    timing: &RetryTiming,
) -> Box<dyn MessagingWorker> {
    match provider {
        ProviderConfig::DurableTopic(config) => Box::new(durable::DurableTopicWorker::new(
            config.clone(),
            job_name,
            callback,
            *timing,
        )),
        ProviderConfig::PubSub(config) => Box::new(pubsub::PubSubWorker::new(
            config.clone(),
            job_name,
            callback,
            *timing,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DurableTopicProvider, PubSubProvider};
    use crate::trigger::LoggingCallback;

    #[test]
    fn test_interrupt_hook_sets_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let hook = InterruptHook::new(flag.clone());
        hook.prepare();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_empty_hook_is_noop() {
        InterruptHook::none().prepare();
    }

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::DurableTopic.to_string(), "durable-topic");
        assert_eq!(BackendKind::PubSub.to_string(), "pub-sub");
    }

    #[test]
    fn test_factory_selects_backend() {
        let timing = RetryTiming::default();
        let callback: Arc<dyn TriggerCallback> = Arc::new(LoggingCallback);

        let durable = ProviderConfig::DurableTopic(DurableTopicProvider {
            name: "amq".to_string(),
            broker_url: "tcp://localhost:61613".to_string(),
            username_env: None,
            password_env: None,
            topic: Some("CI".to_string()),
            base_url: None,
        });
        let worker = create_worker(&durable, "job-a", callback.clone(), &timing);
        assert_eq!(worker.job_name(), "job-a");
        assert_eq!(worker.state(), WorkerState::Disconnected);
        assert!(!worker.is_connected());

        let pubsub = ProviderConfig::PubSub(PubSubProvider {
            name: "fedmsg".to_string(),
            hub_addr: Some("tcp://localhost:9940".to_string()),
            pub_addr: None,
            topic: None,
        });
        let worker = create_worker(&pubsub, "job-b", callback, &timing);
        assert_eq!(worker.job_name(), "job-b");
        assert!(!worker.is_connected());
    }

    #[test]
    fn test_deadline_after_clamps_huge_timeouts() {
        let before = Instant::now();
        assert!(deadline_after(Duration::from_secs(5)) >= before + Duration::from_secs(5));
        assert!(deadline_after(Duration::MAX) > before + Duration::from_secs(86_400 * 365));
    }

    #[test]
    fn test_subscribed_states() {
        assert!(WorkerState::Subscribed.is_subscribed());
        assert!(WorkerState::Waiting {
            deadline: Instant::now()
        }
        .is_subscribed());
        assert!(!WorkerState::Disconnected.is_subscribed());
        assert!(!WorkerState::TimedOut.is_subscribed());
    }
}
