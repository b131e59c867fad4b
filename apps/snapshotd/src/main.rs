use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use snapshot_core::DestinationSlot;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;
mod lock;
mod logs;
mod snapshot;
mod supervisor;

#[derive(Parser, Debug)]
#[command(
    name = "snapshotd",
    version,
    about = "Periodically snapshot a data file and record it in version control"
)]
struct Cli {
    /// Config file (defaults to $SNAPSHOTD_CONFIG, ./snapshotd.toml, then the user config dir)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
    /// File to snapshot
    #[arg(long)]
    source: Option<PathBuf>,
    /// Snapshot destination
    #[arg(long)]
    destination: Option<PathBuf>,
    /// Seconds between snapshots
    #[arg(long)]
    interval_secs: Option<u64>,
    /// Skip commit/publish of snapshots
    #[arg(long)]
    no_history: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides = config::Overrides {
        source: cli.source,
        destination: cli.destination,
        interval_secs: cli.interval_secs,
        no_history: cli.no_history,
    };
    let config = config::load(cli.config.as_deref(), overrides)?;

    let sink = logs::LogSink::open(&config.log.path, config.log.max_bytes, config.log.backups)
        .with_context(|| format!("failed to open log file {}", config.log.path.display()))?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(sink)
                .with_timer(logs::LocalTimer)
                .with_ansi(false),
        )
        .init();

    let slot = DestinationSlot::new(&config.destination);
    let guard = match lock::acquire_slot_lock(&slot) {
        Ok(guard) => guard,
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            let holder = lock::lock_holder(&slot)
                .map(|pid| format!("pid {pid}"))
                .unwrap_or_else(|| "another process".to_string());
            warn!(
                "{} already snapshots {}, exiting",
                holder,
                slot.current().display()
            );
            return Ok(());
        }
        Err(err) => {
            let path = slot.lock_path();
            return Err(err).with_context(|| format!("failed to lock {}", path.display()));
        }
    };
    info!(
        "snapshotd {} starting (lock {})",
        env!("CARGO_PKG_VERSION"),
        guard.path().display()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = supervisor::TaskSet::new();
    for server in config.servers.clone() {
        let name = format!("server:{}", server.name);
        tasks.spawn(name, supervisor::run_server(server, shutdown_rx.clone()));
    }
    tasks.spawn("scheduler", snapshot::run(config, shutdown_rx));

    info!("supervising {} task(s)", tasks.len());

    wait_for_signal().await;
    info!("shutdown requested; waiting for running work to finish");
    let _ = shutdown_tx.send(true);
    tasks.join_all().await;
    info!("snapshotd stopped");
    drop(guard);
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            warn!("SIGTERM handler unavailable: {err}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
