//! beats-gen - Burnt Beats generation service
//!
//! **Module Identity:**
//! - Name: beats-gen
//! - Default port: 5730
//!
//! Accepts authenticated MIDI, audio and voice-clone generation requests,
//! runs the matching generator script as a supervised subprocess and returns
//! the verified output files.

use anyhow::{Context, Result};
use beats_common::config::{default_config_path, RootFolderInitializer};
use beats_common::events::EventBus;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use beats_gen::config::{ConfigOverrides, GenConfig, MODULE_NAME};
use beats_gen::orchestrator::Orchestrator;
use beats_gen::stores::{SqliteRateLimitStore, SqliteUserStore};
use beats_gen::throttle::GenerationThrottle;
use beats_gen::{build_router, db, ApiPolicy, AppState};

/// Interval between throttle bookkeeping sweeps
const THROTTLE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Command-line arguments for beats-gen
#[derive(Parser, Debug)]
#[command(name = "beats-gen")]
#[command(about = "Generation service for Burnt Beats")]
#[command(version)]
struct Args {
    /// Bootstrap TOML file (default: <config dir>/burnt-beats/beats-gen.toml)
    #[arg(short, long, env = "BEATS_GEN_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "BEATS_GEN_PORT")]
    port: Option<u16>,

    /// Root folder for the database and generated files
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "BEATS_GEN_DATABASE")]
    database: Option<PathBuf>,

    /// Development mode: return script error output to clients
    #[arg(long, env = "BEATS_DEV")]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(MODULE_NAME));
    let config = GenConfig::load(
        &config_path,
        ConfigOverrides {
            port: args.port,
            root_folder: args.root_folder,
            database_path: args.database,
            development: args.dev,
        },
    )
    .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    beats_common::logging::init(&config.logging).context("Failed to initialize logging")?;

    info!(
        "Starting {} v{} (config: {}, exists: {})",
        MODULE_NAME,
        env!("CARGO_PKG_VERSION"),
        config_path.display(),
        config_path.exists()
    );
    if config.development {
        info!("Development mode: generation errors include script output");
    }

    let root = RootFolderInitializer::new(config.root_folder());
    root.ensure_directory_exists()
        .context("Failed to create root folder")?;

    let db_path = config.database_path(&root);
    let pool = beats_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;
    db::init_tables(&pool)
        .await
        .context("Failed to initialize database tables")?;

    let event_bus = EventBus::new(100);

    let settings = config.orchestrator_settings(&root);
    info!(
        interpreter = %settings.interpreter.display(),
        working_directory = %settings.working_directory.display(),
        "Generation scripts configured"
    );
    let orchestrator = Orchestrator::new(settings).with_event_bus(event_bus.clone());

    let throttle = GenerationThrottle::per_minute(config.limits.generations_per_minute);

    let state = AppState::new(
        pool.clone(),
        orchestrator,
        Arc::new(SqliteUserStore::new(pool.clone())),
        Arc::new(SqliteRateLimitStore::new(pool.clone())),
        throttle,
        event_bus,
        ApiPolicy {
            development: config.development,
            login_limit: config.limits.login_policy(),
            session_ttl: config.session_ttl(),
            ..ApiPolicy::default()
        },
    );

    let sweep_throttle = state.throttle.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(THROTTLE_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            sweep_throttle.retain_recent();
        }
    });

    let app = build_router(state);

    let ip: IpAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address))?;
    let addr = SocketAddr::new(ip, config.port);

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    pool.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
///
/// In-flight generation requests finish (or time out) before the server
/// stops; their subprocesses are killed if the handler future is dropped.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
