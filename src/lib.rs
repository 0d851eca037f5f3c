//! CI Messaging - message-bus listeners that trigger CI jobs
//!
//! Listens for CI events on a message bus and hands matching messages to a
//! trigger callback; publishes build outcomes back to the bus.
//!
//! # Overview
//!
//! - Selector expressions over message properties (`CI_TYPE = 'complete'`)
//! - Message normalization into a body plus flat property map
//! - Durable-topic (STOMP) and pub/sub (ZeroMQ) workers
//! - Trigger loops with synchronous, cooperative stop
//! - One-shot publish and wait helpers
//!
//! # Quick Start
//!
//! ```rust
//! use ci_messaging::message::{normalize, Payload, RawMessage, CI_MESSAGE};
//! use ci_messaging::selector::Selector;
//! use serde_json::json;
//!
//! let selector = Selector::parse("CI_TYPE = 'complete' AND CI_STATUS = 'passed'").unwrap();
//!
//! let body = json!({"CI_TYPE": "complete", "CI_STATUS": "passed"});
//! let raw = RawMessage::new(Payload::Map(body.as_object().unwrap().clone()))
//!     .with_property("CI_TYPE", "complete")
//!     .with_property("CI_STATUS", "passed");
//!
//! let normalized = normalize(&raw);
//! assert!(selector.matches(&normalized.properties));
//! assert_eq!(
//!     normalized.properties[CI_MESSAGE],
//!     r#"{"CI_STATUS":"passed","CI_TYPE":"complete"}"#
//! );
//! ```

pub mod config;
pub mod error;
pub mod message;
pub mod observability;
pub mod publish;
pub mod selector;
pub mod testing;
pub mod transport;
pub mod trigger;

pub use config::{ConfigError, MessagingConfig, ProviderConfig, RetryTiming};
pub use error::{MessagingError, MessagingResult};
pub use message::{NormalizedMessage, OutboundMessage, RawMessage};
pub use selector::Selector;
pub use transport::{create_worker, BackendKind, CancelSignal, MessagingWorker, WorkerState};
pub use trigger::{ListenerSet, TriggerCallback, TriggerHandle, TriggerLoop};
