//! Mock implementations for testing
//!
//! Provides a scripted [`MessagingWorker`], a callback that records triggers
//! and a security context that records impersonations, so trigger loops can
//! be exercised without a broker.

use crate::transport::{CancelSignal, InterruptHook, MessagingWorker, WorkerState};
use crate::trigger::{PreviousIdentity, SecurityContext, TriggerCallback};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Call counters shared between a [`MockWorker`] and the test holding it
#[derive(Debug, Default)]
pub struct WorkerCalls {
    pub connects: AtomicUsize,
    pub subscribes: AtomicUsize,
    pub receives: AtomicUsize,
    pub timeouts: AtomicUsize,
    pub unsubscribes: AtomicUsize,
    pub disconnects: AtomicUsize,
    subscribe_times: Mutex<Vec<Instant>>,
}

impl WorkerCalls {
    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn receives(&self) -> usize {
        self.receives.load(Ordering::SeqCst)
    }

    pub fn timeouts(&self) -> usize {
        self.timeouts.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// When each subscribe call started
    pub fn subscribe_times(&self) -> Vec<Instant> {
        lock(&self.subscribe_times).clone()
    }
}

/// Scripted worker
///
/// `subscribe` pops the next scripted result (or the default once the script
/// runs out). `receive` delivers a queued message if there is one, otherwise
/// waits for the timeout or a stop request.
pub struct MockWorker {
    job_name: String,
    calls: Arc<WorkerCalls>,
    subscribe_script: VecDeque<bool>,
    subscribe_default: bool,
    messages: Arc<Mutex<VecDeque<HashMap<String, String>>>>,
    callback: Option<Arc<dyn TriggerCallback>>,
    interrupt: Arc<AtomicBool>,
    connected: bool,
    state: WorkerState,
}

impl MockWorker {
    pub fn new(job_name: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            calls: Arc::new(WorkerCalls::default()),
            subscribe_script: VecDeque::new(),
            subscribe_default: true,
            messages: Arc::new(Mutex::new(VecDeque::new())),
            callback: None,
            interrupt: Arc::new(AtomicBool::new(false)),
            connected: false,
            state: WorkerState::Disconnected,
        }
    }

    /// Every subscribe fails
    pub fn failing(job_name: &str) -> Self {
        Self {
            subscribe_default: false,
            ..Self::new(job_name)
        }
    }

    pub fn with_subscribe_results(mut self, results: impl IntoIterator<Item = bool>) -> Self {
        self.subscribe_script = results.into_iter().collect();
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn TriggerCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_message(self, properties: HashMap<String, String>) -> Self {
        lock(&self.messages).push_back(properties);
        self
    }

    pub fn calls(&self) -> Arc<WorkerCalls> {
        Arc::clone(&self.calls)
    }

    /// Queue shared with the worker; push to deliver after the loop started
    pub fn message_queue(&self) -> Arc<Mutex<VecDeque<HashMap<String, String>>>> {
        Arc::clone(&self.messages)
    }

    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }
}

#[async_trait]
impl MessagingWorker for MockWorker {
    fn job_name(&self) -> &str {
        &self.job_name
    }

    async fn connect(&mut self) -> bool {
        self.calls.connects.fetch_add(1, Ordering::SeqCst);
        self.connected = true;
        true
    }

    async fn subscribe(&mut self, _job_name: &str, _selector: &str, cancel: &CancelSignal) -> bool {
        self.calls.subscribes.fetch_add(1, Ordering::SeqCst);
        lock(&self.calls.subscribe_times).push(Instant::now());
        if cancel.is_cancelled() {
            return false;
        }
        let ok = self
            .subscribe_script
            .pop_front()
            .unwrap_or(self.subscribe_default);
        if ok {
            self.connected = true;
            self.state = WorkerState::Subscribed;
        }
        ok
    }

    async fn receive(&mut self, job_name: &str, timeout: Duration, cancel: &CancelSignal) {
        self.calls.receives.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return;
        }

        let next = lock(&self.messages).pop_front();
        if let Some(properties) = next {
            if let Some(callback) = &self.callback {
                callback.on_message(job_name, "mock message", &properties);
            }
            return;
        }

        if cancel.sleep(timeout).await {
            self.calls.timeouts.fetch_add(1, Ordering::SeqCst);
            self.connected = false;
            self.state = WorkerState::Disconnected;
        } else {
            self.interrupt.store(false, Ordering::SeqCst);
            self.state = WorkerState::ShuttingDown;
        }
    }

    async fn unsubscribe(&mut self, _job_name: &str) {
        self.calls.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        self.state = WorkerState::Disconnected;
    }

    async fn disconnect(&mut self) {
        self.calls.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn interrupt_hook(&self) -> InterruptHook {
        InterruptHook::new(Arc::clone(&self.interrupt))
    }

    fn state(&self) -> WorkerState {
        self.state
    }
}

/// One recorded trigger
#[derive(Debug, Clone, PartialEq)]
pub struct TriggeredJob {
    pub job_name: String,
    pub diagnostic: String,
    pub properties: HashMap<String, String>,
}

/// Callback that keeps every trigger it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingCallback {
    triggered: Arc<Mutex<Vec<TriggeredJob>>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn triggered(&self) -> Vec<TriggeredJob> {
        lock(&self.triggered).clone()
    }

    pub fn count(&self) -> usize {
        lock(&self.triggered).len()
    }

    /// Poll until at least `count` triggers arrived; false on timeout
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.count() >= count
    }
}

impl TriggerCallback for RecordingCallback {
    fn on_message(&self, job_name: &str, diagnostic: &str, properties: &HashMap<String, String>) {
        lock(&self.triggered).push(TriggeredJob {
            job_name: job_name.to_string(),
            diagnostic: diagnostic.to_string(),
            properties: properties.clone(),
        });
    }
}

/// Security context that counts impersonations and restores
#[derive(Debug)]
pub struct RecordingIdentity {
    current: Mutex<String>,
    pub impersonations: AtomicUsize,
    pub restores: AtomicUsize,
}

impl RecordingIdentity {
    pub fn new(initial: &str) -> Self {
        Self {
            current: Mutex::new(initial.to_string()),
            impersonations: AtomicUsize::new(0),
            restores: AtomicUsize::new(0),
        }
    }

    pub fn current(&self) -> String {
        lock(&self.current).clone()
    }
}

impl SecurityContext for RecordingIdentity {
    fn impersonate_system(&self) -> PreviousIdentity {
        self.impersonations.fetch_add(1, Ordering::SeqCst);
        let mut current = lock(&self.current);
        PreviousIdentity(std::mem::replace(&mut *current, "SYSTEM".to_string()))
    }

    fn restore(&self, previous: PreviousIdentity) {
        self.restores.fetch_add(1, Ordering::SeqCst);
        *lock(&self.current) = previous.0;
    }
}
