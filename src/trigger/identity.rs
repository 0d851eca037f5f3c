//! Identity a trigger loop runs under
//!
//! A loop switches to the privileged system identity for its whole lifetime
//! and must hand back the previous identity on every exit path. The switch is
//! held by an [`ImpersonationGuard`], which restores on drop, including
//! during unwinding.

use std::sync::{Arc, Mutex};
use tracing::debug;

pub const SYSTEM_IDENTITY: &str = "SYSTEM";

/// Identity that was active before an impersonation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousIdentity(pub String);

pub trait SecurityContext: Send + Sync {
    /// Become the system identity; returns what to restore afterwards
    fn impersonate_system(&self) -> PreviousIdentity;

    fn restore(&self, previous: PreviousIdentity);
}

/// In-process identity holder used when no external context is supplied
#[derive(Debug)]
pub struct ProcessIdentity {
    current: Mutex<String>,
}

impl ProcessIdentity {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            current: Mutex::new(initial.into()),
        }
    }

    pub fn current(&self) -> String {
        match self.current.lock() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, identity: String) -> String {
        let mut current = match self.current.lock() {
            Ok(current) => current,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *current, identity)
    }
}

impl Default for ProcessIdentity {
    fn default() -> Self {
        Self::new("anonymous")
    }
}

impl SecurityContext for ProcessIdentity {
    fn impersonate_system(&self) -> PreviousIdentity {
        PreviousIdentity(self.replace(SYSTEM_IDENTITY.to_string()))
    }

    fn restore(&self, previous: PreviousIdentity) {
        self.replace(previous.0);
    }
}

/// Holds an impersonation; restores the previous identity when dropped
pub struct ImpersonationGuard {
    context: Arc<dyn SecurityContext>,
    previous: Option<PreviousIdentity>,
}

impl ImpersonationGuard {
    pub fn new(context: Arc<dyn SecurityContext>) -> Self {
        let previous = context.impersonate_system();
        debug!(previous = %previous.0, "Impersonating system identity");
        Self {
            context,
            previous: Some(previous),
        }
    }
}

impl Drop for ImpersonationGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            debug!(restored = %previous.0, "Restoring identity");
            self.context.restore(previous);
        }
    }
}
