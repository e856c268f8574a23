// src/bus/mqtt.rs - rumqttc-backed transport

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::collections::VecDeque;
use std::time::Duration;
use uv_studio_shared::config::BusConfig;

use super::transport::{InboundMessage, Transport, TransportError};

const REQUEST_CAPACITY: usize = 64;
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

struct Session {
    client: AsyncClient,
    events: EventLoop,
}

pub struct MqttTransport {
    host: String,
    port: u16,
    client_id: String,
    keep_alive: Duration,
    timeout: Duration,
    session: Option<Session>,
    pending: VecDeque<InboundMessage>,
}

impl MqttTransport {
    pub fn new(config: &BusConfig, client_id: String) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            client_id,
            keep_alive: Duration::from_secs(config.mqtt_keep_alive_secs),
            timeout: config.connect_timeout(),
            session: None,
            pending: VecDeque::new(),
        }
    }

    fn session(&mut self) -> Result<&mut Session, TransportError> {
        self.session.as_mut().ok_or(TransportError::NotConnected)
    }

    /// Drive the event loop until `done` accepts a packet, buffering publishes seen on the way.
    async fn poll_until<F>(&mut self, mut done: F) -> Result<(), TransportError>
    where
        F: FnMut(&Packet) -> Option<Result<(), TransportError>> + Send,
    {
        let timeout = self.timeout;
        let Some(session) = self.session.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        let pending = &mut self.pending;
        let wait = async {
            loop {
                match session.events.poll().await {
                    Ok(Event::Incoming(packet)) => {
                        if let Some(result) = done(&packet) {
                            return result;
                        }
                        if let Packet::Publish(publish) = packet {
                            pending.push_back(InboundMessage {
                                topic: publish.topic,
                                payload: publish.payload.to_vec(),
                            });
                        }
                    }
                    Ok(Event::Outgoing(_)) => {}
                    Err(e) => return Err(TransportError::Connect(e.to_string())),
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.disconnect().await;
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        let (client, events) = AsyncClient::new(options, REQUEST_CAPACITY);
        self.session = Some(Session { client, events });
        tracing::info!(host = %self.host, port = self.port, "Connecting to MQTT broker");

        let result = self
            .poll_until(|packet| match packet {
                Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => Some(Ok(())),
                Packet::ConnAck(ack) => {
                    Some(Err(TransportError::Refused(format!("{:?}", ack.code))))
                }
                _ => None,
            })
            .await;
        if result.is_err() {
            self.session = None;
        }
        result
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.session()?
            .client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        self.poll_until(|packet| matches!(packet, Packet::SubAck(_)).then_some(Ok(())))
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        // try_publish only enqueues; the event loop driven by recv() does the I/O.
        self.session()?
            .client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }
        let session = self.session()?;
        loop {
            match session.events.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.payload.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    }));
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return Err(TransportError::Receive("broker sent disconnect".to_string()));
                }
                Ok(_) => {}
                Err(e) => return Err(TransportError::Receive(e.to_string())),
            }
        }
    }

    async fn disconnect(&mut self) {
        self.pending.clear();
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Err(e) = session.client.try_disconnect() {
            tracing::debug!(error = %e, "MQTT disconnect request failed");
            return;
        }
        // Give the event loop a moment to flush queued publishes and the disconnect packet.
        let flush = async {
            while let Ok(event) = session.events.poll().await {
                if let Event::Outgoing(rumqttc::Outgoing::Disconnect) = event {
                    break;
                }
            }
        };
        let _ = tokio::time::timeout(DISCONNECT_FLUSH, flush).await;
        tracing::info!("Disconnected from MQTT broker");
    }
}
