// src/bus/transport.rs - publish/subscribe transport boundary
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Broker refused connection: {0}")]
    Refused(String),
    #[error("Subscribe failed: {0}")]
    Subscribe(String),
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Receive failed: {0}")]
    Receive(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Not connected")]
    NotConnected,
    #[error("Transport closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish/subscribe session owned by the bus adapter.
///
/// `recv` must be cancel safe: the adapter races it against timers and the
/// outbound queue.
#[async_trait]
pub trait Transport: Send {
    /// Open a fresh session, discarding any previous one.
    async fn connect(&mut self) -> Result<(), TransportError>;
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
    /// Next delivery. `Ok(None)` is a delivery with nothing usable in it.
    async fn recv(&mut self) -> Result<Option<InboundMessage>, TransportError>;
    /// Best-effort teardown of the current session.
    async fn disconnect(&mut self);
}
