// src/bin/uv-studio-cli.rs - operator client for a running UV Studio host
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use uv_studio::bus::mqtt::MqttTransport;
use uv_studio::bus::transport::{Transport, TransportError};
use uv_studio::client::{FeedLine, OperatorClient, RESPONSE_WINDOW, TEST_SEQUENCE};
use uv_studio::config::{self, Config, Overrides};
use uv_studio::shutdown::install_shutdown_handler;
use uv_studio_shared::{Command, JobKind};

#[derive(Debug, Parser)]
#[command(
    name = "uv-studio-cli",
    version,
    about = "Send commands to a UV Studio host and follow its status feed"
)]
struct Args {
    /// What to do; listens to the status feed when omitted
    #[command(subcommand)]
    action: Option<Action>,
    #[arg(long, global = true)]
    broker_host: Option<String>,
    #[arg(long, global = true)]
    broker_port: Option<u16>,
    #[arg(long, global = true)]
    topic_prefix: Option<String>,
    /// Seconds to listen for; forever when omitted
    #[arg(long, global = true)]
    duration: Option<u64>,
    /// Log filter for diagnostics on stderr, e.g. `debug`
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Action {
    /// Start a 12mm print job
    #[command(name = "start_12mm_print")]
    Start12mm,
    /// Start a 16mm print job
    #[command(name = "start_16mm_print")]
    Start16mm,
    /// Ask the host for its current job state
    Status,
    /// Stop the running print
    Stop,
    /// Reset a failed print so new jobs are accepted
    #[command(name = "clear_error")]
    ClearError,
    /// Print status messages as they arrive
    Listen,
    /// Run a short end-to-end check against a live host
    Test,
}

impl Action {
    fn command(self) -> Option<Command> {
        match self {
            Action::Start12mm => Some(Command::StartPrint(JobKind::TwelveMM)),
            Action::Start16mm => Some(Command::StartPrint(JobKind::SixteenMM)),
            Action::Status => Some(Command::Status),
            Action::Stop => Some(Command::Stop),
            Action::ClearError => Some(Command::ClearError),
            Action::Listen | Action::Test => None,
        }
    }
}

fn show(line: FeedLine) {
    println!("{}", line);
}

async fn run<T: Transport>(
    client: &mut OperatorClient<T>,
    action: Action,
    duration: Option<Duration>,
    shutdown: &CancellationToken,
) -> Result<(), TransportError> {
    match action {
        Action::Listen => {
            println!("Listening for status messages (Ctrl+C to stop)...");
            client.listen(duration, shutdown, show).await?;
        }
        Action::Test => {
            println!("Running test sequence...");
            for step in TEST_SEQUENCE {
                println!();
                println!("{}", step.label);
                if let Some(command) = step.command {
                    client.send(command).await?;
                    println!("Command sent: {}", command);
                }
                client.listen(Some(step.listen), shutdown, show).await?;
            }
        }
        other => {
            if let Some(command) = other.command() {
                client.send(command).await?;
                println!("Command sent: {}", command);
                client.listen(Some(RESPONSE_WINDOW), shutdown, show).await?;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level)?)
        .with_writer(std::io::stderr)
        .init();

    let config = config::apply_overrides(
        Config::default(),
        Overrides {
            broker_host: args.broker_host,
            broker_port: args.broker_port,
            topic_prefix: args.topic_prefix,
            ..Overrides::default()
        },
    )?;

    let client_id = format!("uv-studio-cli-{}", &Uuid::new_v4().simple().to_string()[..8]);
    let transport = MqttTransport::new(&config.bus, client_id);
    let mut client = OperatorClient::new(&config.bus, transport);

    if let Err(e) = client.connect().await {
        tracing::error!("Failed to connect to {}:{}: {}", config.bus.host, config.bus.port, e);
        return Err(e.into());
    }
    println!("Connected to MQTT broker at {}:{}", config.bus.host, config.bus.port);
    println!("Subscribed to {}", client.status_topic());

    let shutdown = install_shutdown_handler();
    let action = args.action.unwrap_or(Action::Listen);
    let result = run(&mut client, action, args.duration.map(Duration::from_secs), &shutdown).await;

    client.disconnect().await;
    println!("Disconnected from broker");
    result.map_err(Into::into)
}
