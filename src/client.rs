// src/client.rs - operator client: publish commands and follow the status feed
//
// Used by the `uv-studio-cli` binary to drive a running host by hand.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uv_studio_shared::config::BusConfig;
use uv_studio_shared::{Command, JobKind, StatusEvent, local_time};

use crate::bus::transport::{InboundMessage, Transport, TransportError};

/// How long a one-shot command keeps listening for the host's answer.
pub const RESPONSE_WINDOW: Duration = Duration::from_secs(5);

pub struct SequenceStep {
    pub label: &'static str,
    pub command: Option<Command>,
    pub listen: Duration,
}

/// Smoke test against a live host: query status, start a 12 mm print, watch the feed.
pub const TEST_SEQUENCE: [SequenceStep; 3] = [
    SequenceStep {
        label: "1) status command",
        command: Some(Command::Status),
        listen: Duration::from_secs(2),
    },
    SequenceStep {
        label: "2) 12mm print command",
        command: Some(Command::StartPrint(JobKind::TwelveMM)),
        listen: Duration::from_secs(3),
    },
    SequenceStep {
        label: "3) listening for responses",
        command: None,
        listen: Duration::from_secs(5),
    },
];

/// One delivery seen by the client, ready for display.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedLine {
    Status(StatusEvent),
    Other { topic: String, payload: String },
    NotJson { topic: String, payload: String },
}

impl FeedLine {
    fn parse(status_topic: &str, message: InboundMessage) -> Self {
        let payload = String::from_utf8_lossy(&message.payload).into_owned();
        if message.topic != status_topic {
            return FeedLine::Other {
                topic: message.topic,
                payload,
            };
        }
        match serde_json::from_slice::<StatusEvent>(&message.payload) {
            Ok(event) => FeedLine::Status(event),
            Err(e) => {
                tracing::debug!(error = %e, "Status payload did not decode");
                FeedLine::NotJson {
                    topic: message.topic,
                    payload,
                }
            }
        }
    }
}

impl fmt::Display for FeedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedLine::Status(event) => write!(
                f,
                "[{}] {}: {} ({})",
                local_time(event.timestamp),
                event.level.to_string().to_uppercase(),
                event.message,
                event.job_state
            ),
            FeedLine::Other { topic, payload } => write!(f, "Message on {}: {}", topic, payload),
            FeedLine::NotJson { topic, payload } => {
                write!(f, "Non-JSON message on {}: {}", topic, payload)
            }
        }
    }
}

pub struct OperatorClient<T: Transport> {
    transport: T,
    topic_command: String,
    topic_status: String,
}

impl<T: Transport> OperatorClient<T> {
    pub fn new(config: &BusConfig, transport: T) -> Self {
        Self {
            transport,
            topic_command: config.topic_command(),
            topic_status: config.topic_status(),
        }
    }

    pub fn status_topic(&self) -> &str {
        &self.topic_status
    }

    /// Open a session and subscribe to the host's status feed.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        self.transport.connect().await?;
        self.transport.subscribe(&self.topic_status).await?;
        tracing::info!(topic = %self.topic_status, "Subscribed to status topic");
        Ok(())
    }

    pub async fn send(&mut self, command: Command) -> Result<(), TransportError> {
        let payload = command
            .to_json()
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        self.transport.publish(&self.topic_command, payload).await?;
        tracing::info!(%command, topic = %self.topic_command, "Command sent");
        Ok(())
    }

    /// Hand every delivery to `on_line` until `window` elapses or `shutdown`
    /// fires. Without a window only `shutdown` ends the listen.
    ///
    /// Returns how many deliveries were shown.
    pub async fn listen<F>(
        &mut self,
        window: Option<Duration>,
        shutdown: &CancellationToken,
        mut on_line: F,
    ) -> Result<usize, TransportError>
    where
        F: FnMut(FeedLine),
    {
        let deadline = window.map(|window| Instant::now() + window);
        let mut shown = 0;
        loop {
            let next = async {
                match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, self.transport.recv())
                        .await
                        .ok(),
                    None => Some(self.transport.recv().await),
                }
            };
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = next => received,
            };
            let Some(received) = received else {
                break;
            };
            match received? {
                Some(message) => {
                    on_line(FeedLine::parse(&self.topic_status, message));
                    shown += 1;
                }
                None => tracing::debug!("Ignoring empty delivery"),
            }
        }
        Ok(shown)
    }

    pub async fn disconnect(&mut self) {
        self.transport.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::{MemoryBroker, MemoryTransport, memory_transport};
    use uv_studio_shared::{JobState, StatusLevel};

    fn client() -> (MemoryBroker, OperatorClient<MemoryTransport>) {
        let (broker, transport) = memory_transport();
        (broker, OperatorClient::new(&BusConfig::default(), transport))
    }

    #[tokio::test(start_paused = true)]
    async fn subscribes_to_status_and_publishes_commands() {
        let (broker, mut client) = client();
        client.connect().await.unwrap();
        client.send(Command::StartPrint(JobKind::TwelveMM)).await.unwrap();
        client.send(Command::Stop).await.unwrap();

        assert_eq!(broker.subscriptions(), vec!["uv_studio/status".to_string()]);
        let sent: Vec<Command> = broker
            .published_on("uv_studio/command")
            .iter()
            .map(|payload| Command::decode(payload).unwrap())
            .collect();
        assert_eq!(sent, vec![Command::StartPrint(JobKind::TwelveMM), Command::Stop]);
    }

    #[tokio::test(start_paused = true)]
    async fn listen_classifies_deliveries_until_the_window_closes() {
        let (broker, mut client) = client();
        client.connect().await.unwrap();

        let event = StatusEvent::new(
            StatusLevel::Warning,
            "Unknown command: dance",
            JobState::Running(JobKind::SixteenMM),
        );
        broker.deliver("uv_studio/status", &event.to_json().unwrap());
        broker.deliver("uv_studio/status", b"garbled");
        broker.deliver("uv_studio/control", br#"{"action": "press_start_button"}"#);
        broker.deliver_empty();

        let started = Instant::now();
        let mut lines = Vec::new();
        let shown = client
            .listen(Some(Duration::from_secs(2)), &CancellationToken::new(), |line| {
                lines.push(line)
            })
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(shown, 3);
        assert_eq!(lines[0], FeedLine::Status(event));
        assert!(lines[0].to_string().ends_with("WARNING: Unknown command: dance (running_16mm)"));
        assert_eq!(
            lines[1].to_string(),
            "Non-JSON message on uv_studio/status: garbled"
        );
        assert!(matches!(&lines[2], FeedLine::Other { topic, .. } if topic == "uv_studio/control"));
    }

    #[tokio::test(start_paused = true)]
    async fn open_ended_listen_ends_on_shutdown() {
        let (_broker, mut client) = client();
        client.connect().await.unwrap();
        let shutdown = CancellationToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });
        let shown = client.listen(None, &shutdown, |_| {}).await.unwrap();
        assert_eq!(shown, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn broken_session_surfaces_as_an_error() {
        let (broker, mut client) = client();
        client.connect().await.unwrap();
        broker.drop_session("connection reset by peer");

        let result = client.listen(None, &CancellationToken::new(), |_| {}).await;
        assert!(matches!(result, Err(TransportError::Receive(_))));
    }
}
