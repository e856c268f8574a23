// src/bus/mod.rs - message bus adapter
//! One task owns the transport and the [`BusConnectionState`]. It connects and
//! subscribes, decodes inbound commands for the [`JobController`], publishes
//! queued status and control messages, emits the heartbeat and runs the
//! keepalive check that reconnects after the retry budget was spent.

pub mod memory;
pub mod mqtt;
pub mod state;
pub mod transport;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uv_studio_shared::config::BusConfig;
use uv_studio_shared::{Command, CommandError, StatusEvent};

use crate::controller::JobController;
use crate::reporter::Outbound;
use state::{BusConnectionState, BusEvent, transition};
use transport::{InboundMessage, Transport, TransportError};

/// What other components hold to talk to the adapter.
#[derive(Debug, Clone)]
pub struct BusHandle {
    pub outbound: mpsc::Sender<Outbound>,
    pub state: watch::Receiver<BusConnectionState>,
}

impl BusHandle {
    pub fn new(
        outbound: mpsc::Sender<Outbound>,
        state: watch::Receiver<BusConnectionState>,
    ) -> Self {
        Self { outbound, state }
    }
}

pub struct BusAdapter<T: Transport> {
    config: BusConfig,
    transport: T,
    state: watch::Sender<BusConnectionState>,
    outbound_tx: mpsc::Sender<Outbound>,
    outbound_rx: mpsc::Receiver<Outbound>,
    malformed_streak: u32,
}

impl<T: Transport> BusAdapter<T> {
    pub fn new(config: BusConfig, transport: T) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (state, _) = watch::channel(BusConnectionState::Disconnected);
        Self {
            config,
            transport,
            state,
            outbound_tx,
            outbound_rx,
            malformed_streak: 0,
        }
    }

    pub fn handle(&self) -> BusHandle {
        BusHandle::new(self.outbound_tx.clone(), self.state.subscribe())
    }

    pub fn state(&self) -> BusConnectionState {
        *self.state.borrow()
    }

    fn is_connected(&self) -> bool {
        self.state() == BusConnectionState::Connected
    }

    fn apply(&mut self, event: BusEvent) {
        let from = self.state();
        let to = transition(from, event);
        if from == to {
            return;
        }
        tracing::info!(%from, %to, ?event, "Bus state changed");
        self.state.send_replace(to);
        if from == BusConnectionState::Connected {
            self.discard_queued();
        }
    }

    /// Messages queued before the session dropped are not replayed after it comes back.
    fn discard_queued(&mut self) {
        let mut dropped = 0usize;
        while self.outbound_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(dropped, "Dropped queued outbound messages after losing the bus");
        }
    }

    /// Drive the bus until `shutdown` fires, then flush and disconnect.
    pub async fn run(mut self, controller: JobController, shutdown: CancellationToken) {
        self.apply(BusEvent::Start);
        self.establish(&controller, &shutdown).await;

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let check = self.config.keepalive_check();
        let mut keepalive = tokio::time::interval_at(Instant::now() + check, check);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let connected = self.is_connected();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.transport.recv(), if connected => {
                    self.handle_received(received, &controller, &shutdown).await;
                }
                Some(message) = self.outbound_rx.recv() => {
                    self.publish(message, &controller, &shutdown).await;
                }
                _ = heartbeat.tick() => {
                    if connected {
                        let beat = StatusEvent::heartbeat(controller.query_state());
                        self.publish(Outbound::Status(beat), &controller, &shutdown).await;
                    }
                }
                _ = keepalive.tick() => {
                    if !self.is_connected() {
                        tracing::info!(
                            state = %self.state(),
                            "Keepalive check found the bus down, reconnecting"
                        );
                        self.apply(BusEvent::KeepaliveMissed);
                        self.establish(&controller, &shutdown).await;
                    }
                }
            }
        }

        self.flush().await;
        self.transport.disconnect().await;
        self.apply(BusEvent::Shutdown);
        tracing::info!("Bus adapter stopped");
    }

    /// Connect and subscribe with a bounded number of attempts and fixed backoff.
    ///
    /// Shared by startup, error-triggered reconnects and the keepalive check.
    async fn establish(
        &mut self,
        controller: &JobController,
        shutdown: &CancellationToken,
    ) -> bool {
        if self.state() == BusConnectionState::Reconnecting {
            self.transport.disconnect().await;
        }
        let attempts = self.config.connect_attempts.max(1);
        for attempt in 1..=attempts {
            if shutdown.is_cancelled() {
                return false;
            }
            match self.open_session().await {
                Ok(()) => {
                    self.apply(BusEvent::ConnectSucceeded);
                    self.malformed_streak = 0;
                    tracing::info!(
                        host = %self.config.host,
                        port = self.config.port,
                        topic = %self.config.topic_command(),
                        "Subscribed to command topic"
                    );
                    controller.reporter().info("UV Studio connected to MQTT broker");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "Bus connect attempt failed");
                    if attempt < attempts {
                        tokio::select! {
                            _ = shutdown.cancelled() => return false,
                            _ = tokio::time::sleep(self.config.connect_backoff()) => {}
                        }
                    }
                }
            }
        }
        tracing::error!(attempts, "Could not reach the broker, waiting for the keepalive check");
        self.apply(BusEvent::RetriesExhausted);
        false
    }

    async fn open_session(&mut self) -> Result<(), TransportError> {
        self.transport.connect().await?;
        let topic = self.config.topic_command();
        self.transport.subscribe(&topic).await
    }

    async fn session_lost(&mut self, controller: &JobController, shutdown: &CancellationToken) {
        self.apply(BusEvent::SessionLost);
        self.establish(controller, shutdown).await;
    }

    async fn publish(
        &mut self,
        message: Outbound,
        controller: &JobController,
        shutdown: &CancellationToken,
    ) {
        if !self.is_connected() {
            tracing::debug!(state = %self.state(), "Bus not connected, dropping outbound message");
            return;
        }
        let Some((topic, payload)) = self.encode(&message) else {
            return;
        };
        if let Err(e) = self.transport.publish(&topic, payload).await {
            tracing::warn!(%topic, error = %e, "Publish failed");
            self.session_lost(controller, shutdown).await;
        }
    }

    fn encode(&self, message: &Outbound) -> Option<(String, Vec<u8>)> {
        let (topic, payload) = match message {
            Outbound::Status(event) => (self.config.topic_status(), event.to_json()),
            Outbound::Control(control) => (self.config.topic_control(), control.to_json()),
        };
        match payload {
            Ok(payload) => Some((topic, payload)),
            Err(e) => {
                tracing::error!(%topic, error = %e, "Failed to encode outbound message");
                None
            }
        }
    }

    async fn flush(&mut self) {
        while self.is_connected() {
            let Ok(message) = self.outbound_rx.try_recv() else {
                break;
            };
            let Some((topic, payload)) = self.encode(&message) else {
                continue;
            };
            if let Err(e) = self.transport.publish(&topic, payload).await {
                tracing::warn!(%topic, error = %e, "Publish failed during shutdown flush");
                break;
            }
        }
    }

    async fn handle_received(
        &mut self,
        received: Result<Option<InboundMessage>, TransportError>,
        controller: &JobController,
        shutdown: &CancellationToken,
    ) {
        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::warn!("Received an empty delivery");
                self.malformed(controller, shutdown).await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Receive failed");
                self.session_lost(controller, shutdown).await;
                return;
            }
        };

        if message.topic != self.config.topic_command() {
            tracing::debug!(topic = %message.topic, "Ignoring message on unexpected topic");
            return;
        }
        tracing::info!(
            topic = %message.topic,
            payload = %String::from_utf8_lossy(&message.payload),
            "Received command message"
        );

        match Command::decode(&message.payload) {
            Ok(command) => {
                self.malformed_streak = 0;
                dispatch(command, controller);
            }
            Err(CommandError::Unknown(name)) => {
                self.malformed_streak = 0;
                controller.reporter().warning(format!("Unknown command: {}", name));
            }
            Err(CommandError::Json(e)) => {
                tracing::debug!(error = %e, "Undecodable command payload");
                controller.reporter().error("Failed to decode JSON message");
                self.malformed(controller, shutdown).await;
            }
            Err(CommandError::MissingCommand) => {
                controller.reporter().warning("Unknown command: none");
                self.malformed(controller, shutdown).await;
            }
        }
    }

    /// Repeated empty or malformed deliveries are treated as a broken session.
    async fn malformed(&mut self, controller: &JobController, shutdown: &CancellationToken) {
        self.malformed_streak += 1;
        if self.malformed_streak >= self.config.malformed_threshold.max(1) {
            tracing::warn!(
                streak = self.malformed_streak,
                "Too many malformed deliveries, reconnecting"
            );
            self.malformed_streak = 0;
            self.session_lost(controller, shutdown).await;
        }
    }
}

/// Map one command to one controller operation. Never blocks the bus task.
fn dispatch(command: Command, controller: &JobController) {
    tracing::info!(%command, "Dispatching command");
    match command {
        Command::StartPrint(kind) => {
            let _ = controller.submit(kind);
        }
        Command::Status => controller.report_status(),
        Command::Stop => controller.spawn_stop(),
        Command::ClearError => {
            let _ = controller.clear_error();
        }
    }
}
