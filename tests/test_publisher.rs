//! Publishing and ad hoc waits over the durable-topic backend
//!
//! Each call opens and closes its own broker connection; these tests check
//! what reaches the broker and what comes back to the caller.

mod test_helpers;

use ci_messaging::config::ProviderConfig;
use ci_messaging::publish::{self, MessageType, RunContext, RunStatus};
use ci_messaging::transport::stomp::Command;
use std::collections::HashMap;
use std::time::Duration;
use test_helpers::{fast_timing, BrokerMode, FakeBroker};

fn run_context() -> RunContext {
    let environment: HashMap<String, String> = [
        ("BUILD_URL", "https://ci.example.com/job/my-job/42/"),
        ("BUILD_NUMBER", "42"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    RunContext::new("my-job")
        .with_status(RunStatus::Succeeded)
        .with_environment(environment)
}

#[tokio::test]
async fn test_send_publishes_json_frame_with_ci_properties() {
    let broker = FakeBroker::start(BrokerMode::Accept).await;
    let provider = ProviderConfig::DurableTopic(broker.provider(Some("CI")));

    publish::send_message(
        &provider,
        &run_context(),
        MessageType::ComponentBuildDone,
        "build_url=${BUILD_URL}\nnumber = ${BUILD_NUMBER}",
        r#"{"build": "${BUILD_NUMBER}", "literal": "$${BUILD_NUMBER}"}"#,
        &fast_timing(),
    )
    .await
    .unwrap();

    let sent = broker.frames(Command::Send);
    assert_eq!(sent.len(), 1);
    let frame = &sent[0];
    assert_eq!(frame.get("destination"), Some("/topic/CI"));
    assert_eq!(frame.get("type"), Some("application/json"));
    assert_eq!(frame.get("CI_NAME"), Some("my-job"));
    assert_eq!(frame.get("CI_TYPE"), Some("component-build-done"));
    assert_eq!(frame.get("CI_STATUS"), Some("passed"));
    assert_eq!(
        frame.get("build_url"),
        Some("https://ci.example.com/job/my-job/42/")
    );
    assert_eq!(frame.get("number"), Some("42"));
    assert_eq!(
        String::from_utf8_lossy(&frame.body),
        r#"{"build": "42", "literal": "${BUILD_NUMBER}"}"#
    );

    // The publish connection is closed once the broker has the message
    assert!(broker.wait_for_frames(Command::Disconnect, 1).await);
}

#[tokio::test]
async fn test_send_while_running_omits_status() {
    let broker = FakeBroker::start(BrokerMode::Accept).await;
    let provider = ProviderConfig::DurableTopic(broker.provider(Some("CI")));

    publish::send_message(
        &provider,
        &RunContext::new("my-job"),
        MessageType::TestingStarted,
        "",
        "",
        &fast_timing(),
    )
    .await
    .unwrap();

    let frame = &broker.frames(Command::Send)[0];
    assert_eq!(frame.get("CI_TYPE"), Some("testing-started"));
    assert_eq!(frame.get("CI_STATUS"), None);
}

#[tokio::test]
async fn test_concurrent_sends_use_independent_connections() {
    let broker = FakeBroker::start(BrokerMode::Accept).await;
    let provider = ProviderConfig::DurableTopic(broker.provider(Some("CI")));
    let timing = fast_timing();

    let sends = (0..3).map(|n| {
        let provider = &provider;
        let timing = &timing;
        async move {
            publish::send_message(
                provider,
                &RunContext::new(format!("job-{n}")),
                MessageType::Custom,
                "",
                "",
                timing,
            )
            .await
        }
    });
    let results = futures::future::join_all(sends).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(broker.accepts(), 3);
    let mut names: Vec<String> = broker
        .frames(Command::Send)
        .iter()
        .filter_map(|f| f.get("CI_NAME").map(str::to_string))
        .collect();
    names.sort();
    assert_eq!(names, vec!["job-0", "job-1", "job-2"]);
}

#[tokio::test]
async fn test_send_fails_when_broker_rejects_connection() {
    let broker = FakeBroker::start(BrokerMode::RejectConnect).await;
    let provider = ProviderConfig::DurableTopic(broker.provider(Some("CI")));

    let result = publish::send_message(
        &provider,
        &run_context(),
        MessageType::Custom,
        "",
        "hello",
        &fast_timing(),
    )
    .await;

    assert!(result.is_err());
    assert!(broker.frames(Command::Send).is_empty());
}

#[tokio::test]
async fn test_send_rejects_malformed_properties_without_connecting() {
    let broker = FakeBroker::start(BrokerMode::Accept).await;
    let provider = ProviderConfig::DurableTopic(broker.provider(Some("CI")));

    let result = publish::send_message(
        &provider,
        &run_context(),
        MessageType::Custom,
        "bad=\\u12",
        "",
        &fast_timing(),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(broker.accepts(), 0);
}

#[tokio::test]
async fn test_wait_returns_body_of_first_delivered_message() {
    let broker = FakeBroker::start(BrokerMode::Accept).await;
    broker.queue_message(
        &[
            ("destination", "/topic/CI"),
            ("message-id", "ID:fake-7"),
            ("CI_TYPE", "complete"),
        ],
        "build finished",
    );
    let provider = ProviderConfig::DurableTopic(broker.provider(Some("CI")));

    let body = publish::wait_for_message_within(
        &provider,
        "CI_TYPE = 'complete'",
        Duration::from_secs(2),
        &fast_timing(),
    )
    .await
    .unwrap();

    assert_eq!(body.as_deref(), Some("build finished"));

    let subscribe = &broker.frames(Command::Subscribe)[0];
    assert_eq!(subscribe.get("selector"), Some("CI_TYPE = 'complete'"));
    // Ad hoc waits never create a durable subscription
    assert_eq!(subscribe.get("activemq.subscriptionName"), None);
}

#[tokio::test]
async fn test_wait_times_out_with_none() {
    let broker = FakeBroker::start(BrokerMode::Accept).await;
    let provider = ProviderConfig::DurableTopic(broker.provider(Some("CI")));

    let body = publish::wait_for_message_within(
        &provider,
        "",
        Duration::from_millis(200),
        &fast_timing(),
    )
    .await
    .unwrap();

    assert_eq!(body, None);
    assert!(broker.wait_for_frames(Command::Disconnect, 1).await);
}

#[tokio::test]
async fn test_wait_rejects_invalid_selector() {
    let broker = FakeBroker::start(BrokerMode::Accept).await;
    let provider = ProviderConfig::DurableTopic(broker.provider(Some("CI")));

    let result = publish::wait_for_message_within(
        &provider,
        "CI_TYPE = = 'x'",
        Duration::from_millis(200),
        &fast_timing(),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(broker.accepts(), 0);
}

#[test]
fn test_wait_timeout_defaults_to_an_hour() {
    assert_eq!(publish::wait_timeout(None), Duration::from_secs(3600));
    assert_eq!(publish::wait_timeout(Some(0)), Duration::from_secs(3600));
    assert_eq!(publish::wait_timeout(Some(-5)), Duration::from_secs(3600));
    assert_eq!(publish::wait_timeout(Some(2)), Duration::from_secs(120));
}

#[test]
fn test_wait_timeout_saturates_on_huge_minutes() {
    assert_eq!(
        publish::wait_timeout(Some(i64::MAX)),
        Duration::from_secs(u64::MAX)
    );
}
