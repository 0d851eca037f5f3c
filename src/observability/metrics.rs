//! Thread-safe listener metrics
//!
//! Atomic counters updated by workers, trigger loops and publishers, and a
//! serialisable snapshot for logging on shutdown.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

pub struct MetricsCollector {
    // Listener lifecycle
    active_listeners: AtomicU64,
    listeners_started: AtomicU64,
    subscriptions_established: AtomicU64,
    subscribe_failures: AtomicU64,
    receive_timeouts: AtomicU64,
    transport_errors: AtomicU64,

    // Inbound messages
    messages_received: AtomicU64,
    messages_matched: AtomicU64,
    messages_filtered: AtomicU64,
    decode_failures: AtomicU64,
    last_message_at: AtomicU64,

    // Outbound messages
    messages_published: AtomicU64,
    publish_failures: AtomicU64,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            active_listeners: AtomicU64::new(0),
            listeners_started: AtomicU64::new(0),
            subscriptions_established: AtomicU64::new(0),
            subscribe_failures: AtomicU64::new(0),
            receive_timeouts: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_matched: AtomicU64::new(0),
            messages_filtered: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            last_message_at: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    pub fn listener_started(&self) {
        self.listeners_started.fetch_add(1, Ordering::Relaxed);
        self.active_listeners.fetch_add(1, Ordering::Relaxed);
    }

    pub fn listener_stopped(&self) {
        // Saturating: a reset between start and stop must not wrap the gauge.
        let _ = self
            .active_listeners
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn subscription_established(&self) {
        self.subscriptions_established
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscribe_failed(&self) {
        self.subscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn receive_timed_out(&self) {
        self.receive_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.last_message_at
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn message_matched(&self) {
        self.messages_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_filtered(&self) {
        self.messages_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.active_listeners,
            &self.listeners_started,
            &self.subscriptions_established,
            &self.subscribe_failures,
            &self.receive_timeouts,
            &self.transport_errors,
            &self.messages_received,
            &self.messages_matched,
            &self.messages_filtered,
            &self.decode_failures,
            &self.last_message_at,
            &self.messages_published,
            &self.publish_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        MetricsSnapshot {
            listeners: ListenerMetrics {
                active_listeners: load(&self.active_listeners),
                listeners_started: load(&self.listeners_started),
                subscriptions_established: load(&self.subscriptions_established),
                subscribe_failures: load(&self.subscribe_failures),
                receive_timeouts: load(&self.receive_timeouts),
                transport_errors: load(&self.transport_errors),
            },
            messages: MessageMetrics {
                received: load(&self.messages_received),
                matched: load(&self.messages_matched),
                filtered: load(&self.messages_filtered),
                decode_failures: load(&self.decode_failures),
                last_message_at: load(&self.last_message_at),
            },
            publishing: PublishMetrics {
                published: load(&self.messages_published),
                publish_failures: load(&self.publish_failures),
            },
            uptime_seconds: now.saturating_sub(load(&self.uptime_start)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub listeners: ListenerMetrics,
    pub messages: MessageMetrics,
    pub publishing: PublishMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListenerMetrics {
    pub active_listeners: u64,
    pub listeners_started: u64,
    pub subscriptions_established: u64,
    pub subscribe_failures: u64,
    pub receive_timeouts: u64,
    pub transport_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub matched: u64,
    pub filtered: u64,
    pub decode_failures: u64,
    pub last_message_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishMetrics {
    pub published: u64,
    pub publish_failures: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
