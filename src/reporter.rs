// src/reporter.rs - status and control reporting toward the bus
//! Status reporting toward the message bus.
//!
//! The reporter snapshots the current [`JobState`] into every event and hands it
//! to the bus adapter without waiting. Delivery is best-effort: while the bus is
//! not connected, or when the outbound queue is full, events are dropped.

use tokio::sync::{mpsc, watch};
use uv_studio_shared::{ControlMessage, JobState, StatusEvent, StatusLevel};

use crate::bus::BusHandle;
use crate::bus::state::BusConnectionState;

/// A message queued for the bus I/O context.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Status(StatusEvent),
    Control(ControlMessage),
}

#[derive(Debug, Clone)]
pub struct StatusReporter {
    outbound: mpsc::Sender<Outbound>,
    bus_state: watch::Receiver<BusConnectionState>,
    job_state: watch::Receiver<JobState>,
}

impl StatusReporter {
    pub fn new(bus: BusHandle, job_state: watch::Receiver<JobState>) -> Self {
        Self {
            outbound: bus.outbound,
            bus_state: bus.state,
            job_state,
        }
    }

    pub fn snapshot(&self) -> JobState {
        *self.job_state.borrow()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.report(StatusLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.report(StatusLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.report(StatusLevel::Error, message);
    }

    pub fn report(&self, level: StatusLevel, message: impl Into<String>) {
        let event = StatusEvent::new(level, message, self.snapshot());
        match level {
            StatusLevel::Info => tracing::info!(state = %event.job_state, "{}", event.message),
            StatusLevel::Warning => tracing::warn!(state = %event.job_state, "{}", event.message),
            StatusLevel::Error => tracing::error!(state = %event.job_state, "{}", event.message),
        }
        self.forward(Outbound::Status(event));
    }

    /// Ask the external side to perform a physical action.
    pub fn control(&self, action: &str) {
        tracing::info!(action, "Publishing control message");
        self.forward(Outbound::Control(ControlMessage::new(action)));
    }

    fn forward(&self, message: Outbound) {
        let bus_state = *self.bus_state.borrow();
        if bus_state != BusConnectionState::Connected {
            tracing::debug!(%bus_state, "Bus not connected, dropping outbound message");
            return;
        }
        match self.outbound.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Bus adapter gone, dropping message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uv_studio_shared::JobKind;

    fn reporter(
        bus_state: BusConnectionState,
        capacity: usize,
    ) -> (
        StatusReporter,
        mpsc::Receiver<Outbound>,
        watch::Sender<JobState>,
        watch::Sender<BusConnectionState>,
    ) {
        let (tx, rx) = mpsc::channel(capacity);
        let (bus_tx, bus_rx) = watch::channel(bus_state);
        let (job_tx, job_rx) = watch::channel(JobState::Idle);
        let reporter = StatusReporter::new(BusHandle::new(tx, bus_rx), job_rx);
        (reporter, rx, job_tx, bus_tx)
    }

    #[tokio::test]
    async fn events_carry_the_current_job_state() {
        let (reporter, mut rx, job_tx, _bus) = reporter(BusConnectionState::Connected, 8);
        job_tx.send_replace(JobState::Running(JobKind::SixteenMM));
        reporter.info("[16mm] Scanning the tray");

        match rx.recv().await.unwrap() {
            Outbound::Status(event) => {
                assert_eq!(event.message, "[16mm] Scanning the tray");
                assert_eq!(event.job_state, JobState::Running(JobKind::SixteenMM));
                assert!(event.print_running);
            }
            other => panic!("unexpected outbound {:?}", other),
        }
    }

    #[tokio::test]
    async fn drops_while_disconnected() {
        let (reporter, mut rx, _job, bus_tx) = reporter(BusConnectionState::Reconnecting, 8);
        reporter.warning("lost");
        reporter.control("press_start_button");
        assert!(rx.try_recv().is_err());

        bus_tx.send_replace(BusConnectionState::Connected);
        reporter.control("press_start_button");
        assert!(matches!(
            rx.try_recv().unwrap(),
            Outbound::Control(msg) if msg.action == "press_start_button"
        ));
    }

    #[tokio::test]
    async fn never_blocks_on_a_full_queue() {
        let (reporter, mut rx, _job, _bus) = reporter(BusConnectionState::Connected, 1);
        reporter.info("first");
        reporter.info("second");
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Status(e) if e.message == "first"));
        assert!(rx.try_recv().is_err());
    }
}
