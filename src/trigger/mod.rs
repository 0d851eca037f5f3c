//! Trigger loops: one long-lived task per listening job
//!
//! A [`TriggerLoop`] drives its worker through subscribe/receive cycles until
//! stopped. Stopping is synchronous: [`TriggerHandle::request_stop`] returns
//! only after the loop has unsubscribed and its task has finished, so a job's
//! configuration can be replaced without leaving a stale subscription behind.

pub mod callback;
pub mod identity;
pub mod registry;

pub use callback::{LoggingCallback, TriggerCallback};
pub use identity::{ImpersonationGuard, PreviousIdentity, ProcessIdentity, SecurityContext};
pub use registry::ListenerSet;

use crate::config::RetryTiming;
use crate::listener_span;
use crate::observability::metrics;
use crate::transport::{CancelSignal, InterruptHook, MessagingWorker};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, Instrument};

pub struct TriggerLoop {
    job_name: String,
    selector: String,
    worker: Box<dyn MessagingWorker>,
    timing: RetryTiming,
    identity: Arc<dyn SecurityContext>,
}

impl TriggerLoop {
    pub fn new(
        job_name: impl Into<String>,
        selector: impl Into<String>,
        worker: Box<dyn MessagingWorker>,
        timing: RetryTiming,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            selector: selector.into(),
            worker,
            timing,
            identity: Arc::new(ProcessIdentity::default()),
        }
    }

    /// Run under an externally managed identity context
    pub fn with_identity(mut self, identity: Arc<dyn SecurityContext>) -> Self {
        self.identity = identity;
        self
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Spawn the loop on the current runtime
    pub fn start(self) -> TriggerHandle {
        let cancel = CancelSignal::new();
        let hook = self.worker.interrupt_hook();
        let job_name = self.job_name.clone();
        let span = listener_span!(job = %job_name, selector = %self.selector);

        let task = tokio::spawn(self.run(cancel.clone()).instrument(span));

        TriggerHandle {
            job_name,
            cancel,
            hook,
            task: Some(task),
        }
    }

    async fn run(mut self, cancel: CancelSignal) {
        let _identity = ImpersonationGuard::new(Arc::clone(&self.identity));
        metrics().listener_started();
        info!(job = %self.job_name, "Listener started");

        while !cancel.is_cancelled() {
            if self
                .worker
                .subscribe(&self.job_name, &self.selector, &cancel)
                .await
            {
                self.worker
                    .receive(&self.job_name, self.timing.receive_timeout, &cancel)
                    .await;
            } else if !cancel.is_cancelled() {
                // Unreachable broker or missing configuration
                cancel.sleep(self.timing.unavailable_backoff).await;
            }
        }

        self.worker.unsubscribe(&self.job_name).await;
        metrics().listener_stopped();
        info!(job = %self.job_name, "Listener stopped");
    }
}

/// Owner's side of a running [`TriggerLoop`]
///
/// Dropping the handle requests a stop without waiting for it.
pub struct TriggerHandle {
    job_name: String,
    cancel: CancelSignal,
    hook: InterruptHook,
    task: Option<JoinHandle<()>>,
}

impl TriggerHandle {
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the loop without waiting for it
    pub fn signal_stop(&self) {
        self.hook.prepare();
        self.cancel.cancel();
    }

    /// Stop the loop and wait until it has unsubscribed and exited
    pub async fn request_stop(mut self) {
        info!(job = %self.job_name, "Stopping listener");
        self.signal_stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(job = %self.job_name, error = %e, "Listener task ended abnormally");
            }
        }
    }
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.signal_stop();
        }
    }
}
