mod config;
mod connection;
mod jobs;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use connection::{ConnectionEvent, ConnectionManager};
use jobs::{MessageRouter, ShellCommandRunner};
use std::path::PathBuf;
use std::sync::Arc;
use transport::Transport;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Device agent for remote job execution over AWS IoT Jobs
#[derive(Parser, Debug)]
#[command(name = "iot-jobs-agent", version, about)]
struct Args {
    /// Path to config file
    #[arg(long, default_value = "configs/config.yaml")]
    config: PathBuf,

    /// Override the config's current environment
    #[arg(long)]
    env: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(&args.config).context("Failed to load config")?;
    let env = config
        .environment(args.env.as_deref())
        .context("Failed to get environment")?;
    env.validate().context("Invalid environment config")?;

    info!("IoT agent starting: {}", env.thing_name);
    info!("  Endpoint: {}", env.iot_endpoint);
    info!("  Root CA: {}", env.root_ca_path.display());
    info!("  Device cert: {}", env.cert_path.display());
    info!("  Private key: {}", env.key_path.display());
    info!("  Polling interval: {}s", env.common.polling_interval);

    let mut conn = ConnectionManager::new(env.connection_config())
        .context("Failed to create IoT client")?;
    let transport = conn.transport();

    let topics = env.topics();
    info!("Listening for job notifications on {}", topics.notify());

    let router = MessageRouter::new(
        topics,
        transport.clone(),
        Arc::new(ShellCommandRunner::new()),
    );
    info!(
        "Job router ready for {} over {}",
        conn.client_id(),
        transport.name()
    );

    info!("IoT Agent started. Press CTRL+C to exit");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    // Main event loop
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
            event = conn.recv() => match event {
                Some(ConnectionEvent::Connected { endpoint }) => {
                    info!("Connected to AWS IoT Core at {}", endpoint);
                }
                Some(ConnectionEvent::Disconnected { reason }) => {
                    warn!("Disconnected: {}", reason);
                }
                Some(ConnectionEvent::Received(message)) => {
                    router.route(&message).await;
                }
                None => {
                    error!("Connection manager closed");
                    break;
                }
            }
        }
    }

    conn.close().await;
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
