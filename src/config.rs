// src/config.rs - command-line overrides on top of the shared config
//! The model and loader live in `uv_studio_shared::config`; this module adds
//! the command-line overrides the host binary accepts on top of a file.
//!
//! ```toml
//! [bus]
//! host = "broker.local"
//! topic_prefix = "uv_studio"
//!
//! [screen]
//! window_title = "eufy"
//! retina = false
//! ```

pub use uv_studio_shared::config::*;

/// Values given on the command line. `None` keeps the file (or default) value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub broker_host: Option<String>,
    pub broker_port: Option<u16>,
    pub topic_prefix: Option<String>,
    pub window_title: Option<String>,
    pub retina: Option<bool>,
}

/// Apply `overrides` to `config` and validate the result.
pub fn apply_overrides(mut config: Config, overrides: Overrides) -> Result<Config, ConfigError> {
    if let Some(host) = overrides.broker_host {
        config.bus.host = host;
    }
    if let Some(port) = overrides.broker_port {
        config.bus.port = port;
    }
    if let Some(prefix) = overrides.topic_prefix {
        config.bus.topic_prefix = prefix;
    }
    if let Some(title) = overrides.window_title {
        config.screen.window_title = title;
    }
    if let Some(retina) = overrides.retina {
        config.screen.retina = retina;
    }
    config.validate()?;
    Ok(config)
}
