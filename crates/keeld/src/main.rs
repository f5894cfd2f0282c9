//! keeld — the Keel daemon.
//!
//! Single binary that assembles the substrate:
//! - Checkpoint store (redb)
//! - Metrics + circuit breaker registries
//! - Observability REST API
//! - Checkpoint retention loop
//!
//! # Usage
//!
//! ```text
//! keeld serve --config /etc/keel/keel.toml --data-dir /var/lib/keel
//! keeld prune --config /etc/keel/keel.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use keel_checkpoint::{CheckpointStore, RetentionPolicy};
use keel_core::KeelConfig;
use keel_observability::ObservabilityService;

#[derive(Parser)]
#[command(name = "keeld", about = "Keel observability daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the observability API and run checkpoint retention.
    Serve {
        /// Path to keel.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides `[server] port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for the checkpoint database.
        #[arg(long, default_value = "/var/lib/keel")]
        data_dir: PathBuf,

        /// Emit JSON log lines.
        #[arg(long)]
        json_logs: bool,
    },

    /// Run one retention pass over the checkpoint store and exit.
    Prune {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "/var/lib/keel")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            json_logs,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            init_tracing(json_logs || config.server.json_logs);
            run_serve(config, data_dir).await
        }
        Command::Prune { config, data_dir } => {
            let config = load_config(config.as_deref())?;
            init_tracing(false);
            run_prune(&config, &data_dir).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,keeld=debug,keel=debug"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<KeelConfig> {
    match path {
        Some(path) => KeelConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(KeelConfig::default()),
    }
}

fn open_store(config: &KeelConfig, data_dir: &Path) -> anyhow::Result<CheckpointStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db_path = config.checkpoints.resolve_path(data_dir);
    let store = CheckpointStore::open(&db_path)?;
    info!(path = ?db_path, "checkpoint store opened");
    Ok(store)
}

async fn run_serve(config: KeelConfig, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("Keel daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let store = open_store(&config, &data_dir)?;
    let service = Arc::new(ObservabilityService::from_config(&config, store.clone())?);
    info!(
        io_timeout = %keel_core::format_duration(config.checkpoints.io_timeout()?),
        "observability service initialized"
    );

    let policy = RetentionPolicy::from_config(&config.checkpoints.retention)?;
    let prune_interval = config.checkpoints.prune_interval()?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let retention_handle = tokio::spawn(async move {
        store.run_retention(policy, prune_interval, shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = keel_api::build_router(service);
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %listener.local_addr()?, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Err(e) = retention_handle.await {
        tracing::error!(error = %e, "checkpoint retention task failed");
    }

    info!("Keel daemon stopped");
    Ok(())
}

async fn run_prune(config: &KeelConfig, data_dir: &Path) -> anyhow::Result<()> {
    let store = open_store(config, data_dir)?;
    let policy = RetentionPolicy::from_config(&config.checkpoints.retention)?;
    let report = tokio::task::spawn_blocking(move || store.prune(&policy)).await??;
    info!(
        examined = report.examined,
        removed = report.removed,
        retained = report.retained(),
        "retention pass complete"
    );
    Ok(())
}
