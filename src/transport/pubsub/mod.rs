//! Pub/sub backend over ZeroMQ
//!
//! There is no broker-side state: each cycle opens a SUB socket on the hub,
//! subscribes to a topic prefix, and filters every frame locally with the
//! job's selector. The receive loop polls in short slices so a stop request
//! or interrupt is noticed well before the receive window closes.

mod envelope;
mod oneshot;
mod worker;

pub use envelope::{scalar_properties, Envelope, CONTENT_KEY, TOPIC_KEY};
pub use oneshot::{send_message, wait_for_message};
pub use worker::PubSubWorker;

use crate::error::{MessagingError, MessagingResult};
use bytes::Bytes;
use zeromq::ZmqMessage;

pub(crate) fn message_frames(message: ZmqMessage) -> Vec<Bytes> {
    message.into_vec()
}

pub(crate) fn multipart(topic: Bytes, payload: Bytes) -> ZmqMessage {
    let mut message = ZmqMessage::from(topic);
    message.push_back(payload);
    message
}

pub(crate) fn require_hub(addr: Option<&str>, provider: &str) -> MessagingResult<String> {
    addr.filter(|a| !a.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            MessagingError::configuration_missing(format!(
                "provider '{provider}' has no hub address configured"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_keeps_frame_order() {
        let message = multipart(Bytes::from_static(b"topic"), Bytes::from_static(b"{}"));
        let frames = message_frames(message);
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], b"topic");
        assert_eq!(&frames[1][..], b"{}");
    }

    #[test]
    fn test_require_hub() {
        assert!(require_hub(Some("tcp://hub:9940"), "fedmsg").is_ok());
        assert!(require_hub(Some("  "), "fedmsg").unwrap_err().is_configuration());
        assert!(require_hub(None, "fedmsg").unwrap_err().is_configuration());
    }
}
