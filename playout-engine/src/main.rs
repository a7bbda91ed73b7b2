//! Playout engine - main entry point
//!
//! Runs the playout actor over the SQLite library and serves the HTTP/SSE
//! control API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use playout_engine::api::{self, AppContext};
use playout_engine::collaborators::{
    Collaborators, ConfigFallbackProvider, EventBusTelemetry, SqliteLibrary,
};
use playout_engine::config::PlayoutConfig;
use playout_engine::db;
use playout_engine::playback::{ClockOutput, PlayoutService};
use playout_engine::SharedState;

/// Command-line arguments for the playout engine
#[derive(Parser, Debug)]
#[command(name = "playout")]
#[command(about = "Continuous audio playout engine")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "PLAYOUT_PORT")]
    port: Option<u16>,

    /// Library database path (overrides the config file)
    #[arg(short, long, env = "PLAYOUT_DATABASE")]
    database: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is loaded before tracing so its log level can apply; problems
    // are reported once the subscriber is up
    let loaded = PlayoutConfig::load(args.config.as_deref());
    let (config, config_path) = match &loaded {
        Ok((config, path)) => (config.clone(), path.clone()),
        Err(_) => (PlayoutConfig::default(), None),
    };

    let default_filter = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = loaded {
        return Err(anyhow::Error::new(e).context("Failed to load configuration"));
    }
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => warn!("No configuration file found; using compiled defaults"),
    }

    let port = args.port.unwrap_or(config.server.port);
    let db_path = args
        .database
        .clone()
        .unwrap_or_else(|| config.database.resolved_path());
    info!("Starting playout engine on port {}", port);

    let pool = db::connect(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let library = Arc::new(SqliteLibrary::new(pool).context("Failed to build HTTP client")?);

    if config.emergency.playlist.is_empty() {
        warn!("Emergency playlist is empty; repeated failures will stop playout");
    } else {
        info!(
            "Emergency playlist: {} entries",
            config.emergency.playlist.len()
        );
    }

    let state = Arc::new(SharedState::new());
    let collaborators = Collaborators {
        queue_provider: library.clone(),
        resolver: library.clone(),
        fallback: Arc::new(ConfigFallbackProvider::new(config.emergency.playlist.clone())),
        telemetry: Arc::new(EventBusTelemetry::new(state.event_bus())),
    };

    let (handle, engine_task) = PlayoutService::start(
        config.engine.clone(),
        Box::new(ClockOutput::new().with_assumed_duration(config.output.assumed_duration_seconds)),
        collaborators,
        state.clone(),
    )
    .await;
    info!("Playout engine initialized");

    let ip: std::net::IpAddr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.server.bind_addr))?;
    let addr = SocketAddr::new(ip, port);

    let ctx = AppContext {
        handle: handle.clone(),
        state,
        resolver: library,
    };
    api::run(addr, ctx, shutdown_signal())
        .await
        .context("Server error")?;

    if let Err(e) = handle.shutdown().await {
        warn!("Engine shutdown: {}", e);
    }
    if let Err(e) = engine_task.await {
        warn!("Engine task ended abnormally: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
