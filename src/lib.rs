// src/lib.rs - remote print-job control over MQTT

pub mod bus;
pub mod client;
pub mod config;
pub mod controller;
pub mod pipeline;
pub mod reporter;
pub mod shutdown;
pub mod step;
pub mod workflows;

pub use bus::{BusAdapter, BusHandle};
pub use controller::{ClearOutcome, JobController, Rejection, StopOutcome};
pub use reporter::{Outbound, StatusReporter};
