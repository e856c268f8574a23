// src/status.rs - outbound status and control payloads

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::job::JobState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusLevel::Info => "info",
            StatusLevel::Warning => "warning",
            StatusLevel::Error => "error",
        })
    }
}

/// One status message for `<prefix>/status`. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub timestamp: f64,
    pub level: StatusLevel,
    pub message: String,
    pub print_running: bool,
    pub job_state: JobState,
}

pub const HEARTBEAT_MESSAGE: &str = "heartbeat";

impl StatusEvent {
    pub fn new(level: StatusLevel, message: impl Into<String>, job_state: JobState) -> Self {
        Self {
            timestamp: crate::epoch_seconds(),
            level,
            message: message.into(),
            print_running: job_state.is_active(),
            job_state,
        }
    }

    pub fn heartbeat(job_state: JobState) -> Self {
        Self::new(StatusLevel::Info, HEARTBEAT_MESSAGE, job_state)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.message == HEARTBEAT_MESSAGE
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// A request for the external side to perform a physical action, sent on `<prefix>/control`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub action: String,
    pub timestamp: f64,
}

impl ControlMessage {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            timestamp: crate::epoch_seconds(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobKind;

    #[test]
    fn status_event_wire_shape() {
        let event = StatusEvent::new(
            StatusLevel::Warning,
            "Cannot start 16mm print",
            JobState::Running(JobKind::TwelveMM),
        );
        let value: serde_json::Value = serde_json::from_slice(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["level"], "warning");
        assert_eq!(value["message"], "Cannot start 16mm print");
        assert_eq!(value["print_running"], true);
        assert_eq!(value["job_state"], "running_12mm");
        assert!(value["timestamp"].as_f64().unwrap() > 1.0e9);
    }

    #[test]
    fn status_event_decodes_without_loss() {
        let event = StatusEvent::new(
            StatusLevel::Error,
            "Printer not online",
            JobState::Error(JobKind::SixteenMM),
        );
        let decoded: StatusEvent = serde_json::from_slice(&event.to_json().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn heartbeat_reports_idle_as_not_running() {
        let beat = StatusEvent::heartbeat(JobState::Idle);
        assert!(beat.is_heartbeat());
        assert!(!beat.print_running);
        assert_eq!(beat.level, StatusLevel::Info);
    }

    #[test]
    fn control_message_shape() {
        let msg = ControlMessage::new("press_start_button");
        let value: serde_json::Value = serde_json::from_slice(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["action"], "press_start_button");
        assert!(value["timestamp"].is_number());
    }
}
