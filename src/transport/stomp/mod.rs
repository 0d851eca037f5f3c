//! STOMP 1.2 client used by the durable-topic backend
//!
//! Only the client side of the protocol needed for listening and publishing
//! is implemented: CONNECT, SUBSCRIBE, SEND, DISCONNECT and the broker's
//! CONNECTED, MESSAGE, RECEIPT and ERROR replies. Heart-beating is disabled.

pub mod connection;
pub mod frame;

pub use connection::{ConnectOptions, StompConnection};
pub use frame::{Command, Frame};

use crate::error::MessagingError;
use thiserror::Error;
use url::Url;

/// Default STOMP port for brokers addressed without one
pub const DEFAULT_STOMP_PORT: u16 = 61613;

#[derive(Debug, Error)]
pub enum StompError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Broker error: {message}")]
    Broker { message: String, details: String },
    #[error("Connection closed by broker")]
    Closed,
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),
}

impl StompError {
    pub(crate) fn from_error_frame(frame: &Frame) -> Self {
        StompError::Broker {
            message: frame.get("message").unwrap_or("unspecified").to_string(),
            details: String::from_utf8_lossy(&frame.body).trim().to_string(),
        }
    }
}

impl From<StompError> for MessagingError {
    fn from(err: StompError) -> Self {
        match err {
            StompError::Protocol(message) => MessagingError::transport_failed(message),
            other => MessagingError::transport_unavailable(other),
        }
    }
}

/// Broker host and port from a `tcp://`, `stomp://` or `stomp+tcp://` URL
pub fn parse_broker_url(broker_url: &str) -> Result<(String, u16), StompError> {
    let url = Url::parse(broker_url).map_err(|_| StompError::InvalidUrl(broker_url.to_string()))?;
    match url.scheme() {
        "tcp" | "stomp" | "stomp+tcp" => {}
        other => {
            return Err(StompError::InvalidUrl(format!(
                "{broker_url} (unsupported scheme '{other}')"
            )))
        }
    }
    let host = url
        .host_str()
        .ok_or_else(|| StompError::InvalidUrl(broker_url.to_string()))?;
    Ok((host.to_string(), url.port().unwrap_or(DEFAULT_STOMP_PORT)))
}
