// src/job.rs - job kinds and lifecycle state
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobTagError {
    #[error("Unknown job kind: {0}")]
    UnknownKind(String),
    #[error("Unknown job state tag: {0}")]
    UnknownTag(String),
}

/// The physical print variants the controller can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    TwelveMM,
    SixteenMM,
}

impl JobKind {
    /// Index of the canvas tab holding this job's layout.
    pub fn canvas_index(self) -> u32 {
        match self {
            JobKind::TwelveMM => 0,
            JobKind::SixteenMM => 1,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            JobKind::TwelveMM => "12mm",
            JobKind::SixteenMM => "16mm",
        }
    }

    /// Prefix used on operator-facing status messages, e.g. `[12mm] `.
    pub fn prefix(self) -> String {
        format!("[{}] ", self.tag())
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for JobKind {
    type Err = JobTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "12mm" => Ok(JobKind::TwelveMM),
            "16mm" => Ok(JobKind::SixteenMM),
            other => Err(JobTagError::UnknownKind(other.to_string())),
        }
    }
}

/// What the system is doing right now. Exactly one value is live at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    Idle,
    Running(JobKind),
    Stopping(JobKind),
    Error(JobKind),
}

impl JobState {
    pub fn kind(&self) -> Option<JobKind> {
        match *self {
            JobState::Idle => None,
            JobState::Running(k) | JobState::Stopping(k) | JobState::Error(k) => Some(k),
        }
    }

    /// True while an execution unit owns the job (running or winding down).
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Running(_) | JobState::Stopping(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, JobState::Error(_))
    }

    /// Wire tag, e.g. `idle`, `running_12mm`, `error_16mm`.
    pub fn tag(&self) -> String {
        match self {
            JobState::Idle => "idle".to_string(),
            JobState::Running(k) => format!("running_{}", k),
            JobState::Stopping(k) => format!("stopping_{}", k),
            JobState::Error(k) => format!("error_{}", k),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

impl FromStr for JobState {
    type Err = JobTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "idle" {
            return Ok(JobState::Idle);
        }
        let (phase, kind) = s
            .split_once('_')
            .ok_or_else(|| JobTagError::UnknownTag(s.to_string()))?;
        let kind: JobKind = kind.parse()?;
        match phase {
            "running" => Ok(JobState::Running(kind)),
            "stopping" => Ok(JobState::Stopping(kind)),
            "error" => Ok(JobState::Error(kind)),
            _ => Err(JobTagError::UnknownTag(s.to_string())),
        }
    }
}

impl Serialize for JobState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.tag())
    }
}

impl<'de> Deserialize<'de> for JobState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        tag.parse().map_err(serde::de::Error::custom)
    }
}
