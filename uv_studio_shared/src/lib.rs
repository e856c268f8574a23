// src/lib.rs - shared types and collaborator traits

pub mod command;
pub mod config;
pub mod job;
pub mod screen;
pub mod simulated;
pub mod status;

pub use command::{Command, CommandEnvelope, CommandError};
pub use job::{JobKind, JobState};
pub use screen::{Point, Rect, ScreenDriver, ScreenError, Template};
pub use status::{ControlMessage, StatusEvent, StatusLevel};

/// Seconds since the Unix epoch with millisecond precision, as carried on the wire.
pub fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Render a wire timestamp in local time for operator output.
pub fn local_time(timestamp: f64) -> String {
    match chrono::DateTime::from_timestamp_millis((timestamp * 1000.0) as i64) {
        Some(utc) => utc
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => format!("{:.3}", timestamp),
    }
}
