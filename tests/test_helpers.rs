//! Test helpers and utilities for integration tests
//!
//! `FakeBroker` is a minimal in-process STOMP broker: it answers CONNECT,
//! acknowledges receipts, records every frame it sees and delivers queued
//! MESSAGE frames to each new subscription.

#![allow(dead_code)]

use bytes::BytesMut;
use ci_messaging::config::{DurableTopicProvider, RetryTiming};
use ci_messaging::transport::stomp::{Command, Frame};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerMode {
    Accept,
    /// Answer CONNECT with an ERROR frame
    RejectConnect,
    /// Answer SUBSCRIBE with an ERROR frame
    RejectSubscribe,
    /// Acknowledge SUBSCRIBE, then drop the connection
    DropAfterSubscribe,
}

#[derive(Default)]
struct BrokerState {
    frames: Mutex<Vec<Frame>>,
    queued: Mutex<VecDeque<Frame>>,
    accepts: AtomicUsize,
}

pub struct FakeBroker {
    addr: SocketAddr,
    state: Arc<BrokerState>,
    task: JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start(mode: BrokerMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(BrokerState::default());

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.accepts.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, Arc::clone(&accept_state), mode));
            }
        });

        Self { addr, state, task }
    }

    pub fn url(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// Queue a MESSAGE delivered to the next subscription
    pub fn queue_message(&self, headers: &[(&str, &str)], body: &str) {
        let frame = headers
            .iter()
            .fold(Frame::new(Command::Message), |f, (k, v)| f.header(*k, *v))
            .body(body.to_string());
        self.state.queued.lock().unwrap().push_back(frame);
    }

    /// Queue a map message the way the broker renders `jms-map-json`
    pub fn queue_map_message(&self, properties: &[(&str, &str)], body: serde_json::Value) {
        let mut headers = vec![
            ("destination", "/topic/CI"),
            ("message-id", "ID:fake-1"),
            ("transformation", "jms-map-json"),
        ];
        headers.extend_from_slice(properties);
        self.queue_message(&headers, &body.to_string());
    }

    pub fn accepts(&self) -> usize {
        self.state.accepts.load(Ordering::SeqCst)
    }

    pub fn frames(&self, command: Command) -> Vec<Frame> {
        self.state
            .frames
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.command == command)
            .cloned()
            .collect()
    }

    /// Poll until the broker has seen `count` frames of `command`
    pub async fn wait_for_frames(&self, command: Command, count: usize) -> bool {
        for _ in 0..200 {
            if self.frames(command).len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    pub fn provider(&self, topic: Option<&str>) -> DurableTopicProvider {
        DurableTopicProvider {
            name: "amq".to_string(),
            broker_url: self.url(),
            username_env: None,
            password_env: None,
            topic: topic.map(str::to_string),
            base_url: Some("https://ci.example.com/".to_string()),
        }
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn write(stream: &mut TcpStream, frame: Frame) -> std::io::Result<()> {
    let mut buf = BytesMut::new();
    frame.encode(&mut buf);
    stream.write_all(&buf).await
}

fn receipt_for(frame: &Frame) -> Option<Frame> {
    frame
        .get("receipt")
        .map(|id| Frame::new(Command::Receipt).header("receipt-id", id))
}

async fn serve(mut stream: TcpStream, state: Arc<BrokerState>, mode: BrokerMode) {
    let mut buffer = BytesMut::new();
    loop {
        let frame = loop {
            match Frame::decode(&mut buffer) {
                Ok(Some(frame)) => break frame,
                Ok(None) => {}
                Err(_) => return,
            }
            match stream.read_buf(&mut buffer).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        };
        state.frames.lock().unwrap().push(frame.clone());

        let result = match frame.command {
            Command::Connect | Command::Stomp => {
                if mode == BrokerMode::RejectConnect {
                    let _ = write(
                        &mut stream,
                        Frame::new(Command::Error)
                            .header("message", "Authentication failed")
                            .body("User name or password is invalid"),
                    )
                    .await;
                    return;
                }
                write(
                    &mut stream,
                    Frame::new(Command::Connected)
                        .header("version", "1.2")
                        .header("session", "fake-session"),
                )
                .await
            }
            Command::Subscribe => {
                if mode == BrokerMode::RejectSubscribe {
                    let mut error = Frame::new(Command::Error).header("message", "Invalid selector");
                    if let Some(id) = frame.get("receipt") {
                        error = error.header("receipt-id", id);
                    }
                    let _ = write(&mut stream, error).await;
                    return;
                }
                let mut result = match receipt_for(&frame) {
                    Some(receipt) => write(&mut stream, receipt).await,
                    None => Ok(()),
                };
                let subscription = frame.get("id").unwrap_or("0").to_string();
                let queued: Vec<Frame> = state.queued.lock().unwrap().drain(..).collect();
                for message in queued {
                    if result.is_err() {
                        break;
                    }
                    result = write(&mut stream, message.header("subscription", subscription.clone())).await;
                }
                if mode == BrokerMode::DropAfterSubscribe {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    return;
                }
                result
            }
            Command::Disconnect => {
                if let Some(receipt) = receipt_for(&frame) {
                    let _ = write(&mut stream, receipt).await;
                }
                let _ = stream.shutdown().await;
                return;
            }
            _ => match receipt_for(&frame) {
                Some(receipt) => write(&mut stream, receipt).await,
                None => Ok(()),
            },
        };

        if result.is_err() {
            return;
        }
    }
}

/// Timing scaled down for tests
pub fn fast_timing() -> RetryTiming {
    RetryTiming {
        receive_timeout: Duration::from_millis(500),
        subscribe_retry: Duration::from_millis(200),
        unavailable_backoff: Duration::from_millis(50),
        poll_slice: Duration::from_millis(50),
        publish_settle: Duration::from_millis(300),
        connect_timeout: Duration::from_secs(2),
    }
}
