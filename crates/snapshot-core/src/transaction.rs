use std::path::{Path, PathBuf};

use snapshot_history::HistoryBackend;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::reconcile::{ReconcileOptions, ReconcileOutcome, reconcile};
use crate::slot::{CopyReport, DestinationSlot};

struct HistoryLink {
    backend: Box<dyn HistoryBackend>,
    options: ReconcileOptions,
}

/// One snapshot attempt: rotate-and-copy into the slot, then reconcile the
/// slot with the history backend. Reconciliation runs after every copy
/// attempt, failed or not.
pub struct SnapshotTransaction {
    source: PathBuf,
    slot: DestinationSlot,
    history: Option<HistoryLink>,
}

#[derive(Debug)]
pub struct TransactionReport {
    pub copy: CopyReport,
    pub reconcile: ReconcileOutcome,
}

impl TransactionReport {
    pub fn copied_at(&self) -> Option<Instant> {
        self.copy.copied_at
    }
}

impl SnapshotTransaction {
    pub fn new(source: impl Into<PathBuf>, slot: DestinationSlot) -> Self {
        Self {
            source: source.into(),
            slot,
            history: None,
        }
    }

    pub fn with_history(
        mut self,
        backend: impl HistoryBackend + 'static,
        options: ReconcileOptions,
    ) -> Self {
        self.history = Some(HistoryLink {
            backend: Box::new(backend),
            options,
        });
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn slot(&self) -> &DestinationSlot {
        &self.slot
    }

    /// Blocking; performs file I/O and runs history commands.
    pub fn run(&self) -> TransactionReport {
        debug!(
            "snapshot transaction: {} -> {}",
            self.source.display(),
            self.slot.current().display()
        );
        let copy = self.slot.replace_from(&self.source);

        let reconcile = match &self.history {
            Some(link) => reconcile(
                link.backend.as_ref(),
                self.slot.current(),
                &link.options,
            ),
            None => {
                debug!("history backend disabled; skipping reconciliation");
                ReconcileOutcome::Skipped
            }
        };

        info!(
            "snapshot transaction finished: copy={} history={:?}",
            if copy.is_copied() { "ok" } else { "failed" },
            reconcile
        );
        TransactionReport { copy, reconcile }
    }
}
