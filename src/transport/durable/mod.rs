//! Durable-topic backend
//!
//! Each listening job holds one broker connection with a client id unique to
//! (provider, installation, host, job) and one durable subscription named
//! after the job, so the broker keeps undelivered messages between cycles.
//! Filtering happens on the broker through the subscription selector.

mod message;
mod oneshot;
mod worker;

pub use message::raw_message_from_frame;
pub use oneshot::{send_message, wait_for_message};
pub use worker::DurableTopicWorker;

use std::net::IpAddr;
use tokio::net::UdpSocket;

/// JMS type stamped on outbound messages
pub const JSON_TYPE: &str = "application/json";

/// Transformation asking the broker to deliver map messages as JSON
pub const MAP_TRANSFORMATION: &str = "jms-map-json";

pub(crate) fn topic_destination(topic: &str) -> String {
    if topic.starts_with("/topic/") || topic.starts_with("/queue/") {
        topic.to_string()
    } else {
        format!("/topic/{topic}")
    }
}

/// Address of the interface used for outbound traffic. No packet is sent;
/// connecting a UDP socket only selects a route.
pub(crate) async fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    if socket.connect("192.0.2.1:9").await.is_err() {
        return Some(IpAddr::from([127, 0, 0, 1]));
    }
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_destination() {
        assert_eq!(topic_destination("CI"), "/topic/CI");
        assert_eq!(topic_destination("/topic/CI"), "/topic/CI");
        assert_eq!(topic_destination("/queue/jobs"), "/queue/jobs");
    }

    #[tokio::test]
    async fn test_local_ip_is_resolved() {
        assert!(local_ip().await.is_some());
    }
}
