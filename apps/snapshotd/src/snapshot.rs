use std::sync::Arc;
use std::time::Duration;

use snapshot_core::{DestinationSlot, Recovery, Scheduler, SnapshotTransaction};
use snapshot_history::GitBackend;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;

pub fn build_transaction(config: &Config) -> SnapshotTransaction {
    let slot = DestinationSlot::new(&config.destination);
    let tx = SnapshotTransaction::new(&config.source, slot);
    if !config.history.enabled {
        info!("history backend disabled; snapshots are local only");
        return tx;
    }

    let backend = GitBackend::new(config.history_repo_dir())
        .with_program(&config.history.program)
        .with_remote(config.history.remote.clone(), config.history.branch.clone());
    info!(
        "history backend: {} in {}",
        config.history.program,
        backend.repo_dir().display()
    );
    tx.with_history(backend, config.reconcile_options())
}

/// Recover the slot, then drive the scheduler until shutdown.
pub async fn run(config: Config, shutdown: watch::Receiver<bool>) {
    let tx = Arc::new(build_transaction(&config));

    match tx.slot().recover() {
        Ok(Recovery::Clean) => {}
        Ok(Recovery::RestoredScratch) => {
            warn!("restored {} from an interrupted snapshot", tx.slot().current().display());
        }
        Err(err) => error!("slot recovery failed ({}): {err}", err.reason()),
    }

    let scheduler = Scheduler::new(Duration::from_secs(config.interval_secs), Arc::clone(&tx))
        .with_poll(Duration::from_secs(config.poll_secs));
    info!(
        "snapshotting {} -> {} every {}s",
        tx.source().display(),
        tx.slot().current().display(),
        scheduler.interval().as_secs()
    );
    let state = scheduler.run(shutdown).await;
    if state.last_attempt_at.is_none() {
        info!("scheduler stopped before the first snapshot was due");
    }
}
