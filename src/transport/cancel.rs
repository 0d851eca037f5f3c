//! Cooperative cancellation shared between a trigger loop and its owner

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cloneable stop flag
///
/// Every clone observes the same flag. Once set it stays set, so a sleep or
/// wait that was cut short never hides the request from later checks.
///
/// ```rust
/// use ci_messaging::transport::CancelSignal;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let signal = CancelSignal::new();
/// let stopper = signal.clone();
/// stopper.cancel();
///
/// assert!(!signal.sleep(Duration::from_secs(3600)).await);
/// assert!(signal.is_cancelled());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so this only returns on a set flag.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep for `delay` unless cancelled first.
    /// Returns true if the full delay elapsed, false if cancellation cut it short.
    pub async fn sleep(&self, delay: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(delay) => !self.is_cancelled(),
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
