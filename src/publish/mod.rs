//! Outbound messages: build, substitute and send through either backend
//!
//! Every publish and wait opens its own short-lived connection or socket, so
//! calls are independent of running listeners and of each other.

pub mod message_type;
pub mod properties;
pub mod substitution;

pub use message_type::{MessageType, UnknownMessageType};
pub use properties::parse_properties;
pub use substitution::substitute;

use crate::config::{ProviderConfig, RetryTiming};
use crate::error::{sanitize_error_message, MessagingResult};
use crate::message::OutboundMessage;
use crate::observability::metrics;
use crate::publish_span;
use crate::transport::{durable, pubsub};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, Instrument};

/// Used when a wait is requested without a positive timeout
pub const DEFAULT_WAIT_MINUTES: u64 = 60;

/// Outcome of the run a message reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    /// `CI_STATUS` value; none while the run is still going
    pub fn ci_status(&self) -> Option<&'static str> {
        match self {
            RunStatus::Running => None,
            RunStatus::Succeeded => Some("passed"),
            RunStatus::Failed => Some("failed"),
        }
    }
}

/// The run a message is published for
#[derive(Debug, Clone)]
pub struct RunContext {
    pub job_name: String,
    pub status: RunStatus,
    /// Variables available to `${VAR}` substitution
    pub environment: HashMap<String, String>,
}

impl RunContext {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            status: RunStatus::Running,
            environment: HashMap::new(),
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// Substitution variables taken from this process's environment
    pub fn with_process_environment(self) -> Self {
        self.with_environment(std::env::vars().collect())
    }
}

/// Stamp the standard `CI_*` properties, then add the user properties and
/// content with `${VAR}` placeholders resolved. User properties may override
/// the standard ones.
pub fn build_outbound(
    run: &RunContext,
    message_type: MessageType,
    properties: &str,
    content: &str,
) -> MessagingResult<OutboundMessage> {
    let mut message = OutboundMessage::default();
    message
        .properties
        .insert("CI_NAME".to_string(), run.job_name.clone());
    message
        .properties
        .insert("CI_TYPE".to_string(), message_type.as_str().to_string());
    if let Some(status) = run.status.ci_status() {
        message
            .properties
            .insert("CI_STATUS".to_string(), status.to_string());
    }

    if !properties.trim().is_empty() {
        for (key, value) in parse_properties(properties)? {
            message
                .properties
                .insert(key, substitute(&value, &run.environment));
        }
    }

    message.content = substitute(content, &run.environment);
    Ok(message)
}

/// Publish one message on `provider`
pub async fn send_message(
    provider: &ProviderConfig,
    run: &RunContext,
    message_type: MessageType,
    properties: &str,
    content: &str,
    timing: &RetryTiming,
) -> MessagingResult<()> {
    let span = publish_span!(
        job = %run.job_name,
        provider = %provider.name(),
        message_type = %message_type
    );

    async {
        let result = match build_outbound(run, message_type, properties, content) {
            Ok(message) => match provider {
                ProviderConfig::DurableTopic(p) => durable::send_message(p, &message, timing).await,
                ProviderConfig::PubSub(p) => pubsub::send_message(p, &message, timing).await,
            },
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => metrics().message_published(),
            Err(e) => {
                metrics().publish_failed();
                error!(
                    error = %sanitize_error_message(&e.to_string()),
                    "Failed to send message"
                );
            }
        }
        result
    }
    .instrument(span)
    .await
}

/// Receive window for a wait given in minutes
pub fn wait_timeout(minutes: Option<i64>) -> Duration {
    let minutes = match minutes {
        Some(m) if m > 0 => m as u64,
        _ => DEFAULT_WAIT_MINUTES,
    };
    Duration::from_secs(minutes.saturating_mul(60))
}

/// Block until a message matching `selector` arrives on `provider`.
/// Returns its body, or `None` when the wait timed out.
pub async fn wait_for_message(
    provider: &ProviderConfig,
    selector: &str,
    timeout_minutes: Option<i64>,
    timing: &RetryTiming,
) -> MessagingResult<Option<String>> {
    wait_for_message_within(provider, selector, wait_timeout(timeout_minutes), timing).await
}

/// [`wait_for_message`] with an exact receive window
pub async fn wait_for_message_within(
    provider: &ProviderConfig,
    selector: &str,
    timeout: Duration,
    timing: &RetryTiming,
) -> MessagingResult<Option<String>> {
    let span = publish_span!(provider = %provider.name(), selector = %selector);

    async {
        let result = match provider {
            ProviderConfig::DurableTopic(p) => {
                durable::wait_for_message(p, selector, timeout, timing).await
            }
            ProviderConfig::PubSub(p) => pubsub::wait_for_message(p, selector, timeout, timing).await,
        };
        if let Err(e) = &result {
            error!(
                error = %sanitize_error_message(&e.to_string()),
                "Unhandled error waiting for message"
            );
        }
        result
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> RunContext {
        RunContext::new("my-job").with_environment(HashMap::from([
            ("BUILD_NUMBER".to_string(), "42".to_string()),
            ("GIT_COMMIT".to_string(), "abc123".to_string()),
        ]))
    }

    #[test]
    fn test_running_build_has_no_status() {
        let message = build_outbound(&run(), MessageType::TestingStarted, "", "").unwrap();
        assert_eq!(message.properties["CI_NAME"], "my-job");
        assert_eq!(message.properties["CI_TYPE"], "testing-started");
        assert!(!message.properties.contains_key("CI_STATUS"));
    }

    #[test]
    fn test_concluded_build_status() {
        let passed = run().with_status(RunStatus::Succeeded);
        let failed = run().with_status(RunStatus::Failed);
        let m1 = build_outbound(&passed, MessageType::Custom, "", "").unwrap();
        let m2 = build_outbound(&failed, MessageType::Custom, "", "").unwrap();
        assert_eq!(m1.properties["CI_STATUS"], "passed");
        assert_eq!(m2.properties["CI_STATUS"], "failed");
    }

    #[test]
    fn test_properties_and_content_are_substituted() {
        let message = build_outbound(
            &run(),
            MessageType::ComponentBuildDone,
            "BUILD=${BUILD_NUMBER}\nCOMMIT = ${GIT_COMMIT}\n# ignored\n",
            "{\"build\": \"${BUILD_NUMBER}\", \"raw\": \"$${BUILD_NUMBER}\"}",
        )
        .unwrap();
        assert_eq!(message.properties["BUILD"], "42");
        assert_eq!(message.properties["COMMIT"], "abc123");
        assert_eq!(
            message.content,
            "{\"build\": \"42\", \"raw\": \"${BUILD_NUMBER}\"}"
        );
    }

    #[test]
    fn test_user_properties_override_standard_ones() {
        let message =
            build_outbound(&run(), MessageType::Custom, "CI_NAME=renamed", "").unwrap();
        assert_eq!(message.properties["CI_NAME"], "renamed");
    }

    #[test]
    fn test_wait_timeout_defaults() {
        assert_eq!(wait_timeout(None), Duration::from_secs(3600));
        assert_eq!(wait_timeout(Some(0)), Duration::from_secs(3600));
        assert_eq!(wait_timeout(Some(-5)), Duration::from_secs(3600));
        assert_eq!(wait_timeout(Some(2)), Duration::from_secs(120));
    }
}
