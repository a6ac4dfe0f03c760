//! Vigil control plane
//!
//! Main entry point: serves the orchestrator, runs worker processes, and
//! offers a small client for sending control commands.

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_core::config::ConfigStore;
use vigil_core::control_channel::{ControlChannel, ControlClient};
use vigil_core::engine::worker::run_worker;
use vigil_core::orchestrator::Orchestrator;
use vigil_core::state::AppConfig;

#[derive(Parser)]
#[command(name = "vigil-core", version, about = "Vigil video-analytics control plane")]
struct Cli {
    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Serve the orchestrator (default)
    Serve,
    /// Run as a worker process (job payload arrives on stdin)
    Worker,
    /// Send a command token to a running orchestrator
    Command {
        /// Wire token, e.g. process_video_cfg or stop_process_video
        token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Cmd::Serve) {
        Cmd::Serve => serve().await,
        Cmd::Worker => {
            run_worker().await?;
            Ok(())
        }
        Cmd::Command { token } => send_command(&token).await,
    }
}

async fn serve() -> anyhow::Result<()> {
    tracing::info!("Starting vigil control plane v{}", env!("CARGO_PKG_VERSION"));

    let deploy = AppConfig::default();
    tracing::info!(
        host = %deploy.host,
        queue_port = deploy.queue_port,
        config_path = %deploy.config_path.display(),
        "Configuration loaded"
    );

    // A bad processor config is the one fatal startup condition.
    let store = ConfigStore::load(&deploy.config_path)?;
    tracing::info!(
        sources = store.video_sources().len(),
        areas = store.areas().len(),
        "Processor configuration loaded"
    );

    let (channel, endpoint) =
        ControlChannel::bind_with_retry(&deploy.host, deploy.queue_port, &deploy.queue_auth_key)
            .await;
    tracing::info!(addr = %channel.local_addr()?, "Control channel listening");
    tokio::spawn(channel.serve());

    let orchestrator = Orchestrator::new(deploy, store, endpoint);
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received");
            signal_token.cancel();
        }
    });

    orchestrator.serve(shutdown).await;
    Ok(())
}

async fn send_command(token: &str) -> anyhow::Result<()> {
    let deploy = AppConfig::default();
    let host = if deploy.host == "0.0.0.0" {
        "127.0.0.1".to_string()
    } else {
        deploy.host.clone()
    };
    let addr = format!("{}:{}", host, deploy.queue_port).parse()?;

    let mut client = ControlClient::connect_with_retry(addr, &deploy.queue_auth_key).await?;
    let result = client.send(token).await?;
    match (result.success, result.error.as_deref()) {
        (true, _) => tracing::info!(command = %token, "Command accepted"),
        (false, Some(err)) => tracing::warn!(command = %token, error = %err, "Command failed"),
        (false, None) => tracing::warn!(command = %token, "Command rejected"),
    }
    Ok(())
}
