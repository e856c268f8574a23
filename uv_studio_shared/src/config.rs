// src/config.rs - configuration model and loader
//! Shared configuration logic for the host and tests.
//!
//! ```toml
//! [bus]
//! host = "broker.local"
//! topic_prefix = "uv_studio"
//!
//! [screen]
//! window_title = "eufy"
//! retina = true
//!
//! [workflow]
//! poll_interval_ms = 1000
//! scan_max_polls = 300
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub screen: ScreenConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub simulated: SimulatedConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_keepalive_check_ms")]
    pub keepalive_check_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_malformed_threshold")]
    pub malformed_threshold: u32,
    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            topic_prefix: default_topic_prefix(),
            client_id: None,
            connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_connect_backoff_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            keepalive_check_ms: default_keepalive_check_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            malformed_threshold: default_malformed_threshold(),
            mqtt_keep_alive_secs: default_mqtt_keep_alive_secs(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl BusConfig {
    pub fn topic_command(&self) -> String {
        format!("{}/command", self.topic_prefix)
    }

    pub fn topic_status(&self) -> String {
        format!("{}/status", self.topic_prefix)
    }

    pub fn topic_control(&self) -> String {
        format!("{}/control", self.topic_prefix)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive_check(&self) -> Duration {
        Duration::from_millis(self.keepalive_check_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScreenConfig {
    #[serde(default = "default_window_title")]
    pub window_title: String,
    #[serde(default = "default_retina")]
    pub retina: bool,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            window_title: default_window_title(),
            retina: default_retina(),
            confidence: default_confidence(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl ScreenConfig {
    /// Divisor applied to template-match coordinates before clicking.
    pub fn display_scale(&self) -> f64 {
        if self.retina { 2.0 } else { 1.0 }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_window_attempts")]
    pub window_attempts: u32,
    #[serde(default = "default_check_attempts")]
    pub check_attempts: u32,
    #[serde(default = "default_scan_max_polls")]
    pub scan_max_polls: u32,
    #[serde(default = "default_ready_max_polls")]
    pub ready_max_polls: u32,
    #[serde(default = "default_printing_max_polls")]
    pub printing_max_polls: u32,
    #[serde(default = "default_stop_wait_max_polls")]
    pub stop_wait_max_polls: u32,
    #[serde(default = "default_start_button_delay_ms")]
    pub start_button_delay_ms: u64,
    #[serde(default = "default_transition_delay_ms")]
    pub transition_delay_ms: u64,
    #[serde(default)]
    pub check_ink_level: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            window_attempts: default_window_attempts(),
            check_attempts: default_check_attempts(),
            scan_max_polls: default_scan_max_polls(),
            ready_max_polls: default_ready_max_polls(),
            printing_max_polls: default_printing_max_polls(),
            stop_wait_max_polls: default_stop_wait_max_polls(),
            start_button_delay_ms: default_start_button_delay_ms(),
            transition_delay_ms: default_transition_delay_ms(),
            check_ink_level: false,
        }
    }
}

impl WorkflowConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn start_button_delay(&self) -> Duration {
        Duration::from_millis(self.start_button_delay_ms)
    }

    pub fn transition_delay(&self) -> Duration {
        Duration::from_millis(self.transition_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatedConfig {
    #[serde(default = "default_hidden_templates")]
    pub hidden: Vec<String>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            hidden: default_hidden_templates(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bus = &self.bus;
        if bus.topic_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("bus.topic_prefix must not be empty".to_string()));
        }
        if bus.connect_attempts == 0 {
            return Err(ConfigError::Invalid("bus.connect_attempts must be > 0".to_string()));
        }
        if bus.keepalive_check_ms == 0 || bus.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "bus.keepalive_check_ms and bus.heartbeat_interval_ms must be > 0".to_string(),
            ));
        }
        if bus.malformed_threshold == 0 || bus.outbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "bus.malformed_threshold and bus.outbound_capacity must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.screen.confidence) || self.screen.confidence == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "screen.confidence must be in (0, 1], got {}",
                self.screen.confidence
            )));
        }
        let wf = &self.workflow;
        if wf.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("workflow.poll_interval_ms must be > 0".to_string()));
        }
        let budgets = [
            ("window_attempts", wf.window_attempts),
            ("check_attempts", wf.check_attempts),
            ("scan_max_polls", wf.scan_max_polls),
            ("ready_max_polls", wf.ready_max_polls),
            ("printing_max_polls", wf.printing_max_polls),
            ("stop_wait_max_polls", wf.stop_wait_max_polls),
        ];
        for (name, value) in budgets {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("workflow.{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_topic_prefix() -> String {
    "uv_studio".to_string()
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_connect_backoff_ms() -> u64 {
    2000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_keepalive_check_ms() -> u64 {
    10_000
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_malformed_threshold() -> u32 {
    3
}

fn default_mqtt_keep_alive_secs() -> u64 {
    30
}

fn default_outbound_capacity() -> usize {
    64
}

fn default_window_title() -> String {
    "eufy".to_string()
}

fn default_retina() -> bool {
    true
}

fn default_confidence() -> f32 {
    0.9
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_window_attempts() -> u32 {
    3
}

fn default_check_attempts() -> u32 {
    3
}

fn default_scan_max_polls() -> u32 {
    300
}

fn default_ready_max_polls() -> u32 {
    600
}

fn default_printing_max_polls() -> u32 {
    300
}

fn default_stop_wait_max_polls() -> u32 {
    11
}

fn default_start_button_delay_ms() -> u64 {
    10_000
}

fn default_transition_delay_ms() -> u64 {
    2000
}

fn default_hidden_templates() -> Vec<String> {
    vec!["low-ink.png".to_string()]
}

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_deployed_client() {
        let cfg = Config::default();
        assert_eq!(cfg.bus.host, "localhost");
        assert_eq!(cfg.bus.port, 1883);
        assert_eq!(cfg.bus.topic_command(), "uv_studio/command");
        assert_eq!(cfg.bus.topic_status(), "uv_studio/status");
        assert_eq!(cfg.bus.topic_control(), "uv_studio/control");
        assert_eq!(cfg.bus.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(cfg.screen.window_title, "eufy");
        assert_eq!(cfg.screen.display_scale(), 2.0);
        assert_eq!(cfg.workflow.scan_max_polls, 300);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [bus]
            host = "10.0.0.5"
            topic_prefix = "lab"

            [screen]
            retina = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bus.host, "10.0.0.5");
        assert_eq!(cfg.bus.port, 1883);
        assert_eq!(cfg.bus.topic_status(), "lab/status");
        assert_eq!(cfg.screen.display_scale(), 1.0);
        assert_eq!(cfg.workflow.poll_interval_ms, 1000);
    }

    #[test]
    fn validation_rejects_zero_budgets() {
        let mut cfg = Config::default();
        cfg.workflow.stop_wait_max_polls = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid(msg)) if msg.contains("stop_wait_max_polls")
        ));

        let mut cfg = Config::default();
        cfg.bus.topic_prefix = " ".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.screen.confidence = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bus]\nport = 1884\n[workflow]\ncheck_ink_level = true").unwrap();
        let cfg = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.bus.port, 1884);
        assert!(cfg.workflow.check_ink_level);
    }

    #[test]
    fn load_config_reports_missing_file() {
        assert!(matches!(load_config("/nonexistent/uv_studio.toml"), Err(ConfigError::Io(_))));
    }
}
