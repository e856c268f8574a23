// src/main.rs - host entry point: config, logging, bus and controller wiring
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use uv_studio::bus::BusAdapter;
use uv_studio::bus::mqtt::MqttTransport;
use uv_studio::bus::state::BusConnectionState;
use uv_studio::config::{self, Config, Overrides};
use uv_studio::controller::JobController;
use uv_studio::shutdown::install_shutdown_handler;
use uv_studio_shared::simulated::SimulatedScreen;

/// Time a cancelled job gets to run its machine-stop sequence on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(
    name = "uv-studio-host",
    version,
    about = "Drives UV Studio print jobs from MQTT commands"
)]
struct Args {
    /// TOML configuration file; built-in defaults are used when omitted
    #[arg(long, short)]
    config: Option<String>,
    #[arg(long)]
    broker_host: Option<String>,
    #[arg(long)]
    broker_port: Option<u16>,
    #[arg(long)]
    topic_prefix: Option<String>,
    /// Substring of the studio window title
    #[arg(long)]
    window_title: Option<String>,
    /// Halve template-match coordinates before clicking (HiDPI displays)
    #[arg(long)]
    retina: Option<bool>,
    /// Log filter, e.g. `info` or `uv_studio=debug`; overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    // Initialize logging
    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting UV Studio host");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let file_config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            config::load_config(path).map_err(|e| {
                tracing::error!("Failed to load config from '{}': {}", path, e);
                Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
            })?
        }
        None => Config::default(),
    };
    let config = config::apply_overrides(
        file_config,
        Overrides {
            broker_host: args.broker_host,
            broker_port: args.broker_port,
            topic_prefix: args.topic_prefix,
            window_title: args.window_title,
            retina: args.retina,
        },
    )?;

    tracing::info!("Broker: {}:{}", config.bus.host, config.bus.port);
    tracing::info!("Topics: {}/{{command,status,control}}", config.bus.topic_prefix);
    tracing::info!(
        "Window: '{}' (display scale {})",
        config.screen.window_title,
        config.screen.display_scale()
    );

    let screen = SimulatedScreen::new();
    screen.hide_all(&config.simulated.hidden);
    tracing::warn!("No native screen driver available, running against the simulated screen");

    let client_id = config
        .bus
        .client_id
        .clone()
        .unwrap_or_else(|| format!("uv-studio-{}", &Uuid::new_v4().simple().to_string()[..8]));
    let transport = MqttTransport::new(&config.bus, client_id);
    let adapter = BusAdapter::new(config.bus.clone(), transport);
    let bus = adapter.handle();
    let mut bus_state = bus.state.clone();
    let controller = JobController::new(&config, Arc::new(screen), bus);

    let shutdown = install_shutdown_handler();
    let bus_token = CancellationToken::new();
    let bus_task = tokio::spawn(adapter.run(controller.clone(), bus_token.clone()));

    let connected = async {
        bus_state
            .wait_for(|state| *state == BusConnectionState::Connected)
            .await
            .is_ok()
    };
    tokio::select! {
        _ = shutdown.cancelled() => {}
        connected = connected => {
            if connected {
                controller.reporter().info("UV Studio client started and ready");
            }
            shutdown.cancelled().await;
        }
    }
    controller.reporter().info("UV Studio client shutting down");
    controller.shutdown(SHUTDOWN_GRACE).await;

    bus_token.cancel();
    if let Err(e) = bus_task.await {
        tracing::error!("Bus task failed: {}", e);
    }
    tracing::info!("UV Studio host stopped");
    Ok(())
}
