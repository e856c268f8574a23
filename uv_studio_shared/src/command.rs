// src/command.rs - inbound command envelopes from `<prefix>/command`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::job::JobKind;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to decode JSON message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Message has no command field")]
    MissingCommand,
    #[error("Unknown command: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartPrint(JobKind),
    Status,
    Stop,
    ClearError,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::StartPrint(JobKind::TwelveMM) => "start_12mm_print",
            Command::StartPrint(JobKind::SixteenMM) => "start_16mm_print",
            Command::Status => "status",
            Command::Stop => "stop",
            Command::ClearError => "clear_error",
        }
    }

    /// Payload an operator tool publishes on `<prefix>/command`.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&CommandRequest {
            command: self.as_str(),
            timestamp: crate::epoch_seconds(),
        })
    }

    /// Decode a raw payload into a command.
    pub fn decode(payload: &[u8]) -> Result<Self, CommandError> {
        let envelope: CommandEnvelope = serde_json::from_slice(payload)?;
        envelope.command.ok_or(CommandError::MissingCommand)?.parse()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start_12mm_print" => Ok(Command::StartPrint(JobKind::TwelveMM)),
            "start_16mm_print" => Ok(Command::StartPrint(JobKind::SixteenMM)),
            "status" => Ok(Command::Status),
            "stop" => Ok(Command::Stop),
            "clear_error" => Ok(Command::ClearError),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// `{"command": "<name>", ...}`. Extra fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    command: &'a str,
    timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_commands() {
        assert_eq!(
            Command::decode(br#"{"command": "start_12mm_print"}"#).unwrap(),
            Command::StartPrint(JobKind::TwelveMM)
        );
        assert_eq!(
            Command::decode(br#"{"command": "start_16mm_print", "requested_by": "panel"}"#)
                .unwrap(),
            Command::StartPrint(JobKind::SixteenMM)
        );
        assert_eq!(Command::decode(br#"{"command":"clear_error"}"#).unwrap(), Command::ClearError);
    }

    #[test]
    fn names_round_trip() {
        for cmd in [
            Command::StartPrint(JobKind::TwelveMM),
            Command::StartPrint(JobKind::SixteenMM),
            Command::Status,
            Command::Stop,
            Command::ClearError,
        ] {
            assert_eq!(cmd.as_str().parse::<Command>().unwrap(), cmd);
        }
    }

    #[test]
    fn distinguishes_failure_modes() {
        assert!(matches!(Command::decode(b"not json"), Err(CommandError::Json(_))));
        assert!(matches!(
            Command::decode(br#"{"cmd": "stop"}"#),
            Err(CommandError::MissingCommand)
        ));
        assert!(matches!(
            Command::decode(br#"{"command": "pause"}"#),
            Err(CommandError::Unknown(name)) if name == "pause"
        ));
    }

    #[test]
    fn requests_carry_name_and_timestamp() {
        let payload = Command::StartPrint(JobKind::SixteenMM).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["command"], "start_16mm_print");
        assert!(value["timestamp"].as_f64().unwrap() > 0.0);
        assert_eq!(Command::decode(&payload).unwrap(), Command::StartPrint(JobKind::SixteenMM));
    }
}
