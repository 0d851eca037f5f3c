//! A single-owner STOMP session over TCP
//!
//! Reads are buffered so that [`StompConnection::next_message`] and
//! [`StompConnection::read_frame`] can be raced against a timeout or a stop
//! request without losing partially received frames. MESSAGE frames that
//! arrive while a receipt is awaited are queued and handed out first.

use super::frame::{Command, Frame};
use super::{parse_broker_url, StompError};
use crate::config::Credentials;
use bytes::BytesMut;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    /// Connection client id; required for durable subscriptions
    pub client_id: Option<String>,
    /// Bound on the handshake and on each receipt wait
    pub timeout: Duration,
}

impl ConnectOptions {
    pub fn from_url(broker_url: &str, timeout: Duration) -> Result<Self, StompError> {
        let (host, port) = parse_broker_url(broker_url)?;
        Ok(Self {
            host,
            port,
            credentials: Credentials::default(),
            client_id: None,
            timeout,
        })
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    fn connect_frame(&self) -> Frame {
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", self.host.clone())
            .header("heart-beat", "0,0");
        if let Some(login) = &self.credentials.username {
            frame = frame.header("login", login.clone());
        }
        if let Some(passcode) = &self.credentials.password {
            frame = frame.header("passcode", passcode.clone());
        }
        if let Some(client_id) = &self.client_id {
            frame = frame.header("client-id", client_id.clone());
        }
        frame
    }
}

pub struct StompConnection {
    stream: TcpStream,
    buffer: BytesMut,
    pending: VecDeque<Frame>,
    next_receipt: u64,
    timeout: Duration,
    session: Option<String>,
}

impl StompConnection {
    /// Open a TCP connection and complete the CONNECT handshake
    pub async fn connect(options: &ConnectOptions) -> Result<Self, StompError> {
        let stream = timeout(
            options.timeout,
            TcpStream::connect((options.host.as_str(), options.port)),
        )
        .await
        .map_err(|_| StompError::Timeout(format!("TCP connect to {}:{}", options.host, options.port)))??;
        let _ = stream.set_nodelay(true);

        let mut connection = Self {
            stream,
            buffer: BytesMut::with_capacity(8 * 1024),
            pending: VecDeque::new(),
            next_receipt: 0,
            timeout: options.timeout,
            session: None,
        };

        connection.write_frame(&options.connect_frame()).await?;
        let reply = timeout(options.timeout, connection.read_frame())
            .await
            .map_err(|_| StompError::Timeout("CONNECTED frame".to_string()))??;

        match reply {
            Some(frame) if frame.command == Command::Connected => {
                connection.session = frame.get("session").map(str::to_string);
                debug!(
                    host = %options.host,
                    port = options.port,
                    session = ?connection.session,
                    "STOMP session established"
                );
                Ok(connection)
            }
            Some(frame) if frame.command == Command::Error => {
                Err(StompError::from_error_frame(&frame))
            }
            Some(frame) => Err(StompError::Protocol(format!(
                "expected CONNECTED, got {}",
                frame.command
            ))),
            None => Err(StompError::Closed),
        }
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), StompError> {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next frame of any kind. `Ok(None)` means the broker closed the
    /// connection cleanly. Cancel safe.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, StompError> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.buffer)? {
                return Ok(Some(frame));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(StompError::Protocol(
                        "connection closed in the middle of a frame".to_string(),
                    ))
                };
            }
        }
    }

    /// Send `frame` with a receipt request and wait for the broker to confirm it
    pub async fn request(&mut self, frame: Frame) -> Result<(), StompError> {
        self.next_receipt += 1;
        let receipt_id = format!("rcpt-{}", self.next_receipt);
        let command = frame.command;
        self.write_frame(&frame.header("receipt", receipt_id.clone()))
            .await?;

        timeout(self.timeout, self.await_receipt(&receipt_id))
            .await
            .map_err(|_| StompError::Timeout(format!("receipt for {command}")))?
    }

    async fn await_receipt(&mut self, receipt_id: &str) -> Result<(), StompError> {
        loop {
            match self.read_frame().await? {
                Some(frame) => match frame.command {
                    Command::Receipt if frame.get("receipt-id") == Some(receipt_id) => {
                        return Ok(())
                    }
                    Command::Message => self.pending.push_back(frame),
                    Command::Error => return Err(StompError::from_error_frame(&frame)),
                    other => debug!(command = %other, "Ignoring frame while awaiting receipt"),
                },
                None => return Err(StompError::Closed),
            }
        }
    }

    /// Next MESSAGE frame; queued messages first. Cancel safe.
    pub async fn next_message(&mut self) -> Result<Frame, StompError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(frame);
        }
        loop {
            match self.read_frame().await? {
                Some(frame) if frame.command == Command::Message => return Ok(frame),
                Some(frame) if frame.command == Command::Error => {
                    return Err(StompError::from_error_frame(&frame))
                }
                Some(frame) => debug!(command = %frame.command, "Ignoring unexpected frame"),
                None => return Err(StompError::Closed),
            }
        }
    }

    /// Graceful DISCONNECT; the socket is shut down whatever the broker replies
    pub async fn disconnect(mut self) -> Result<(), StompError> {
        let result = self.request(Frame::new(Command::Disconnect)).await;
        let _ = self.stream.shutdown().await;
        result
    }
}
