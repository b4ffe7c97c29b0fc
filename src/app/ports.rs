use crate::error::{PublishError, SubscribeError};
use crate::types::{DeliveryReceipt, MessageEnvelope};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

// Ingest-side ports
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpGetResult, TransportError>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Failure below the HTTP status layer: nothing usable came back.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{}{message}", .kind.prefix())]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }
}

impl TransportErrorKind {
    fn prefix(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout: ",
            TransportErrorKind::Connect => "connection failed: ",
            TransportErrorKind::Other => "",
        }
    }
}

// Broker-side ports
#[async_trait]
pub trait BrokerProducerPort: Send + Sync {
    /// Send one payload and wait for the broker acknowledgment.
    async fn send(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<DeliveryReceipt, PublishError>;

    /// Block until every in-flight message is acknowledged or the timeout passes.
    fn flush(&self, timeout: Duration) -> Result<(), PublishError>;
}

#[async_trait]
pub trait BrokerConsumerPort: Send + Sync {
    fn subscribe(&self, topics: &[String]) -> Result<(), SubscribeError>;

    fn unsubscribe(&self);

    /// Wait for the next message on the current subscription. Must be
    /// cancel-safe so callers can bound it with a timeout.
    async fn recv(&self) -> Result<MessageEnvelope, SubscribeError>;
}
