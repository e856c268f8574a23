// src/bus/memory.rs - in-process loopback transport
//! [`MemoryBroker`] is the test-side handle: it injects deliveries and session
//! failures and records everything the adapter published.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use uv_studio_shared::{ControlMessage, StatusEvent};

use super::transport::{InboundMessage, Transport, TransportError};

#[derive(Debug)]
enum Delivery {
    Message(InboundMessage),
    Empty,
    Error(String),
}

#[derive(Debug, Default)]
struct BrokerState {
    refuse: bool,
    fail_publish: bool,
    connected: bool,
    connects: u32,
    disconnects: u32,
    subscriptions: Vec<String>,
    published: Vec<InboundMessage>,
}

fn lock(shared: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
pub struct MemoryBroker {
    shared: Arc<Mutex<BrokerState>>,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

#[derive(Debug)]
pub struct MemoryTransport {
    shared: Arc<Mutex<BrokerState>>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
}

pub fn memory_transport() -> (MemoryBroker, MemoryTransport) {
    let shared = Arc::new(Mutex::new(BrokerState::default()));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryBroker {
            shared: shared.clone(),
            deliveries: tx,
        },
        MemoryTransport {
            shared,
            deliveries: rx,
        },
    )
}

impl MemoryBroker {
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        let _ = self.deliveries.send(Delivery::Message(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        }));
    }

    pub fn deliver_empty(&self) {
        let _ = self.deliveries.send(Delivery::Empty);
    }

    /// Fail the next receive and drop the session, as a broken socket would.
    pub fn drop_session(&self, reason: &str) {
        let _ = self.deliveries.send(Delivery::Error(reason.to_string()));
    }

    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.shared).refuse = refuse;
    }

    /// Reject the next publish and drop the session with it.
    pub fn fail_next_publish(&self) {
        lock(&self.shared).fail_publish = true;
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared).connected
    }

    pub fn connects(&self) -> u32 {
        lock(&self.shared).connects
    }

    pub fn disconnects(&self) -> u32 {
        lock(&self.shared).disconnects
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.shared).subscriptions.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        lock(&self.shared)
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Every status event published on `topic`, decoded.
    pub fn status_events(&self, topic: &str) -> Vec<StatusEvent> {
        self.published_on(topic)
            .iter()
            .filter_map(|payload| serde_json::from_slice(payload).ok())
            .collect()
    }

    pub fn control_messages(&self, topic: &str) -> Vec<ControlMessage> {
        self.published_on(topic)
            .iter()
            .filter_map(|payload| serde_json::from_slice(payload).ok())
            .collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.shared);
        state.connects += 1;
        state.subscriptions.clear();
        if state.refuse {
            state.connected = false;
            return Err(TransportError::Refused("memory broker refusing connections".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let mut state = lock(&self.shared);
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut state = lock(&self.shared);
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.fail_publish {
            state.fail_publish = false;
            state.connected = false;
            return Err(TransportError::Publish("memory broker rejected publish".to_string()));
        }
        state.published.push(InboundMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        match self.deliveries.recv().await {
            Some(Delivery::Message(message)) => Ok(Some(message)),
            Some(Delivery::Empty) => Ok(None),
            Some(Delivery::Error(reason)) => {
                lock(&self.shared).connected = false;
                Err(TransportError::Receive(reason))
            }
            None => Err(TransportError::Closed),
        }
    }

    async fn disconnect(&mut self) {
        let mut state = lock(&self.shared);
        if state.connected {
            state.connected = false;
            state.disconnects += 1;
        }
    }
}
