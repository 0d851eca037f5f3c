//! Configuration for message-bus providers, listeners and timing
//!
//! The file declares the providers (one per broker or hub), the listeners that
//! bind a job name and selector to a provider, and optional timing overrides.
//! Credentials are never stored in the file; providers name the environment
//! variables that hold them and those are read at connect time.

use crate::transport::BackendKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Topic prefix used by pub/sub providers that do not configure one
pub const DEFAULT_PUBSUB_TOPIC: &str = "org.fedoraproject";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessagingConfig {
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
}

/// Timing overrides; every field is optional
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingSection {
    /// Receive window per trigger-loop cycle (default: 3600 = 1 hour)
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_secs: u64,
    /// Retry interval after a failed subscribe attempt (default: 300 = 5 minutes)
    #[serde(default = "default_subscribe_retry")]
    pub subscribe_retry_secs: u64,
    /// Trigger-loop backoff when subscribe reports the backend unavailable
    #[serde(default = "default_unavailable_backoff")]
    pub unavailable_backoff_secs: u64,
    /// Pub/sub poll tick in milliseconds
    #[serde(default = "default_poll_slice")]
    pub poll_slice_ms: u64,
    /// Delay between binding a pub/sub publisher and sending, in milliseconds
    #[serde(default = "default_publish_settle")]
    pub publish_settle_ms: u64,
    /// Broker handshake and receipt timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_receive_timeout() -> u64 {
    3600
}

fn default_subscribe_retry() -> u64 {
    300
}

fn default_unavailable_backoff() -> u64 {
    2
}

fn default_poll_slice() -> u64 {
    1000
}

fn default_publish_settle() -> u64 {
    5000
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            receive_timeout_secs: default_receive_timeout(),
            subscribe_retry_secs: default_subscribe_retry(),
            unavailable_backoff_secs: default_unavailable_backoff(),
            poll_slice_ms: default_poll_slice(),
            publish_settle_ms: default_publish_settle(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl TimingSection {
    pub fn retry_timing(&self) -> RetryTiming {
        RetryTiming {
            receive_timeout: Duration::from_secs(self.receive_timeout_secs),
            subscribe_retry: Duration::from_secs(self.subscribe_retry_secs),
            unavailable_backoff: Duration::from_secs(self.unavailable_backoff_secs),
            poll_slice: Duration::from_millis(self.poll_slice_ms.max(1)),
            publish_settle: Duration::from_millis(self.publish_settle_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
        }
    }
}

/// Runtime timing used by workers, trigger loops and publishers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTiming {
    pub receive_timeout: Duration,
    pub subscribe_retry: Duration,
    pub unavailable_backoff: Duration,
    pub poll_slice: Duration,
    pub publish_settle: Duration,
    pub connect_timeout: Duration,
}

impl Default for RetryTiming {
    fn default() -> Self {
        TimingSection::default().retry_timing()
    }
}

/// A message-bus provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProviderConfig {
    DurableTopic(DurableTopicProvider),
    PubSub(PubSubProvider),
}

/// Connection-oriented broker with durable topic subscriptions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DurableTopicProvider {
    pub name: String,
    /// Broker address, e.g. `tcp://broker.example.com:61613`
    pub broker_url: String,
    pub username_env: Option<String>,
    pub password_env: Option<String>,
    pub topic: Option<String>,
    /// Externally visible URL of this installation, part of the client id
    pub base_url: Option<String>,
}

/// Socket publish/subscribe hub
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PubSubProvider {
    pub name: String,
    /// Address of the hub we subscribe to
    pub hub_addr: Option<String>,
    /// Address outbound messages are bound to
    pub pub_addr: Option<String>,
    pub topic: Option<String>,
}

/// Credentials resolved from the environment
#[derive(Clone, Default, PartialEq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ProviderConfig {
    pub fn name(&self) -> &str {
        match self {
            ProviderConfig::DurableTopic(p) => &p.name,
            ProviderConfig::PubSub(p) => &p.name,
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            ProviderConfig::DurableTopic(_) => BackendKind::DurableTopic,
            ProviderConfig::PubSub(_) => BackendKind::PubSub,
        }
    }

    pub fn topic(&self) -> Option<&str> {
        match self {
            ProviderConfig::DurableTopic(p) => p.topic(),
            ProviderConfig::PubSub(p) => p.effective_topic(),
        }
    }
}

impl DurableTopicProvider {
    /// Read credentials from the configured environment variables
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: get_env_var_optional(self.username_env.as_ref()),
            password: get_env_var_optional(self.password_env.as_ref()),
        }
    }

    /// Configured topic when present and non-blank
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref().filter(|t| !t.trim().is_empty())
    }
}

impl PubSubProvider {
    /// Topic prefix to subscribe and publish on. `None` means the provider has
    /// no topic configured at all; an empty topic selects the default prefix.
    pub fn effective_topic(&self) -> Option<&str> {
        self.topic.as_deref().map(|t| {
            if t.trim().is_empty() {
                DEFAULT_PUBSUB_TOPIC
            } else {
                t
            }
        })
    }
}

/// A job that listens on a provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerConfig {
    pub job: String,
    pub provider: String,
    #[serde(default)]
    pub selector: String,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MessagingConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: MessagingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for provider in &self.providers {
            let name = provider.name();
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "provider name must not be empty".to_string(),
                ));
            }
            if !names.insert(name) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate provider name '{name}'"
                )));
            }
            if let ProviderConfig::DurableTopic(p) = provider {
                validate_broker_url(&p.broker_url)?;
            }
        }

        let mut jobs = HashSet::new();
        for listener in &self.listeners {
            if listener.job.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "listener job name must not be empty".to_string(),
                ));
            }
            if !jobs.insert(listener.job.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "job '{}' has more than one listener",
                    listener.job
                )));
            }
            if self.provider(&listener.provider).is_none() {
                return Err(ConfigError::UnknownProvider(listener.provider.clone()));
            }
        }

        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Provider by name, or the only provider when `name` is `None`
    pub fn resolve_provider(&self, name: Option<&str>) -> Result<&ProviderConfig, ConfigError> {
        match name {
            Some(name) => self
                .provider(name)
                .ok_or_else(|| ConfigError::UnknownProvider(name.to_string())),
            None => match self.providers.as_slice() {
                [only] => Ok(only),
                [] => Err(ConfigError::InvalidConfig(
                    "no providers configured".to_string(),
                )),
                _ => Err(ConfigError::InvalidConfig(
                    "several providers configured; choose one by name".to_string(),
                )),
            },
        }
    }

    pub fn retry_timing(&self) -> RetryTiming {
        self.timing.retry_timing()
    }
}

fn validate_broker_url(broker_url: &str) -> Result<(), ConfigError> {
    let url = url::Url::parse(broker_url)
        .map_err(|e| ConfigError::InvalidConfig(format!("invalid broker_url '{broker_url}': {e}")))?;
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidConfig(format!(
            "broker_url '{broker_url}' has no host"
        )));
    }
    Ok(())
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
[timing]
receive_timeout_secs = 60
poll_slice_ms = 250

[[providers]]
kind = "durable-topic"
name = "activemq"
broker_url = "tcp://broker.example.com:61613"
username_env = "CI_BROKER_USER"
password_env = "CI_BROKER_PASSWORD"
topic = "CI"
base_url = "https://ci.example.com/"

[[providers]]
kind = "pub-sub"
name = "fedmsg"
hub_addr = "tcp://hub.example.com:9940"
topic = ""

[[listeners]]
job = "my-job"
provider = "activemq"
selector = "CI_TYPE = 'complete'"

[[listeners]]
job = "other-job"
provider = "fedmsg"
"#;

    #[test]
    fn test_full_config_parses() {
        let config = MessagingConfig::from_toml(FULL_CONFIG).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.listeners.len(), 2);
        assert_eq!(config.listeners[1].selector, "");

        let timing = config.retry_timing();
        assert_eq!(timing.receive_timeout, Duration::from_secs(60));
        assert_eq!(timing.poll_slice, Duration::from_millis(250));
        assert_eq!(timing.subscribe_retry, Duration::from_secs(300));
        assert_eq!(timing.unavailable_backoff, Duration::from_secs(2));
    }

    #[test]
    fn test_provider_kinds() {
        let config = MessagingConfig::from_toml(FULL_CONFIG).unwrap();
        assert_eq!(
            config.provider("activemq").unwrap().kind(),
            BackendKind::DurableTopic
        );
        assert_eq!(config.provider("fedmsg").unwrap().kind(), BackendKind::PubSub);
    }

    #[test]
    fn test_empty_pubsub_topic_uses_default_prefix() {
        let config = MessagingConfig::from_toml(FULL_CONFIG).unwrap();
        match config.provider("fedmsg").unwrap() {
            ProviderConfig::PubSub(p) => assert_eq!(p.effective_topic(), Some(DEFAULT_PUBSUB_TOPIC)),
            other => panic!("unexpected provider {other:?}"),
        }
    }

    #[test]
    fn test_missing_pubsub_topic_is_none() {
        let provider = PubSubProvider {
            name: "p".to_string(),
            hub_addr: Some("tcp://localhost:9940".to_string()),
            pub_addr: None,
            topic: None,
        };
        assert_eq!(provider.effective_topic(), None);
    }

    #[test]
    fn test_defaults_without_timing_section() {
        let config = MessagingConfig::from_toml("").unwrap();
        assert_eq!(config.retry_timing(), RetryTiming::default());
        assert_eq!(
            RetryTiming::default().receive_timeout,
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_duplicate_job_rejected() {
        let toml = r#"
[[providers]]
kind = "pub-sub"
name = "fedmsg"
hub_addr = "tcp://hub:9940"

[[listeners]]
job = "a"
provider = "fedmsg"

[[listeners]]
job = "a"
provider = "fedmsg"
"#;
        assert!(matches!(
            MessagingConfig::from_toml(toml),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let toml = r#"
[[listeners]]
job = "a"
provider = "missing"
"#;
        assert!(matches!(
            MessagingConfig::from_toml(toml),
            Err(ConfigError::UnknownProvider(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_invalid_broker_url_rejected() {
        let toml = r#"
[[providers]]
kind = "durable-topic"
name = "amq"
broker_url = "not a url"
"#;
        assert!(MessagingConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let toml = r#"
[[providers]]
kind = "carrier-pigeon"
name = "x"
"#;
        assert!(matches!(
            MessagingConfig::from_toml(toml),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn test_resolve_single_provider() {
        let toml = r#"
[[providers]]
kind = "pub-sub"
name = "only"
"#;
        let config = MessagingConfig::from_toml(toml).unwrap();
        assert_eq!(config.resolve_provider(None).unwrap().name(), "only");
        assert!(config.resolve_provider(Some("nope")).is_err());

        let full = MessagingConfig::from_toml(FULL_CONFIG).unwrap();
        assert!(full.resolve_provider(None).is_err());
    }

    #[test]
    fn test_credentials_from_env() {
        std::env::set_var("CI_MSG_TEST_USER_1", "ci-bot");
        let provider = DurableTopicProvider {
            name: "amq".to_string(),
            broker_url: "tcp://localhost:61613".to_string(),
            username_env: Some("CI_MSG_TEST_USER_1".to_string()),
            password_env: Some("CI_MSG_TEST_PASSWORD_UNSET_1".to_string()),
            topic: Some("CI".to_string()),
            base_url: None,
        };
        let creds = provider.credentials();
        assert_eq!(creds.username.as_deref(), Some("ci-bot"));
        assert_eq!(creds.password, None);
        std::env::remove_var("CI_MSG_TEST_USER_1");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials {
            username: Some("u".to_string()),
            password: Some("hunter2".to_string()),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn test_blank_durable_topic_is_missing() {
        let provider = DurableTopicProvider {
            name: "amq".to_string(),
            broker_url: "tcp://localhost:61613".to_string(),
            username_env: None,
            password_env: None,
            topic: Some("  ".to_string()),
            base_url: None,
        };
        assert_eq!(provider.topic(), None);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = MessagingConfig::from_toml(FULL_CONFIG).unwrap();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let reparsed = MessagingConfig::from_toml(&rendered).unwrap();
        assert_eq!(config, reparsed);
    }
}
