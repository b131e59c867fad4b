use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{error, info, trace, warn};

use crate::errors::SnapshotError;
use crate::reconcile::ReconcileOutcome;
use crate::slot::CopyReport;
use crate::transaction::{SnapshotTransaction, TransactionReport};

/// Runs one snapshot transaction to completion.
#[async_trait]
pub trait Snapshotter: Send + Sync {
    async fn snapshot(&self) -> TransactionReport;
}

#[async_trait]
impl Snapshotter for Arc<SnapshotTransaction> {
    async fn snapshot(&self) -> TransactionReport {
        let tx = Arc::clone(self);
        match tokio::task::spawn_blocking(move || tx.run()).await {
            Ok(report) => report,
            Err(err) => {
                error!("snapshot task aborted: {err}");
                // The task may have died between rotation and restore.
                if let Err(err) = self.slot().recover() {
                    error!("post-abort slot recovery failed: {err}");
                }
                TransactionReport {
                    copy: CopyReport::failed(SnapshotError::io(
                        "running snapshot task",
                        std::io::Error::other(err.to_string()),
                    )),
                    reconcile: ReconcileOutcome::Skipped,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotState {
    pub last_success_at: Option<Instant>,
    pub last_attempt_at: Option<Instant>,
    pub phase: RunPhase,
}

impl SnapshotState {
    pub fn in_progress(&self) -> bool {
        self.phase == RunPhase::Running
    }
}

impl Default for SnapshotState {
    fn default() -> Self {
        Self {
            last_success_at: None,
            last_attempt_at: None,
            phase: RunPhase::Idle,
        }
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// First tick: the interval clock starts now.
    Bootstrapped,
    Waiting { remaining: Duration },
    Ran(TransactionReport),
}

/// Sets the phase to `Running` for as long as it lives.
struct PhaseGuard<'a> {
    phase: &'a mut RunPhase,
}

impl<'a> PhaseGuard<'a> {
    fn enter(phase: &'a mut RunPhase) -> Self {
        *phase = RunPhase::Running;
        Self { phase }
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.phase = RunPhase::Idle;
    }
}

/// Decides when to snapshot. Owns its state outright: the only writer of
/// `phase` is `tick`, and a tick awaits its transaction before returning, so
/// transactions never overlap.
pub struct Scheduler<S> {
    interval: Duration,
    poll: Duration,
    snapshotter: S,
    state: SnapshotState,
}

impl<S: Snapshotter> Scheduler<S> {
    pub fn new(interval: Duration, snapshotter: S) -> Self {
        let interval = interval.max(Duration::from_secs(1));
        Self {
            interval,
            poll: Duration::from_secs(1).min(interval),
            snapshotter,
            state: SnapshotState::default(),
        }
    }

    /// Polling period between ticks; never longer than the interval.
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll.clamp(Duration::from_millis(10), self.interval);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> SnapshotState {
        self.state
    }

    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        let Some(last_success) = self.state.last_success_at else {
            self.state.last_success_at = Some(now);
            info!(
                "snapshot scheduler armed; first snapshot in {}s",
                self.interval.as_secs()
            );
            return TickOutcome::Bootstrapped;
        };

        // A failed copy leaves last_success_at behind; pace retries from the
        // last attempt so a broken source is retried once per interval.
        let mut elapsed = whole_secs(now, last_success);
        if let Some(attempt) = self.state.last_attempt_at {
            elapsed = elapsed.min(whole_secs(now, attempt));
        }
        let interval = self.interval.as_secs();
        if elapsed < interval {
            trace!("snapshot due in {}s", interval - elapsed);
            return TickOutcome::Waiting {
                remaining: Duration::from_secs(interval - elapsed),
            };
        }

        self.state.last_attempt_at = Some(now);
        let report = {
            let _running = PhaseGuard::enter(&mut self.state.phase);
            self.snapshotter.snapshot().await
        };

        match report.copied_at() {
            Some(at) => self.state.last_success_at = Some(at),
            None => warn!(
                "snapshot copy did not complete; next attempt in {}s",
                interval
            ),
        }
        TickOutcome::Ran(report)
    }

    /// Tick until `shutdown` turns true. Shutdown is only observed between
    /// ticks, so a running transaction always completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SnapshotState {
        info!(
            "snapshot scheduler started: interval {}s, poll {}ms",
            self.interval.as_secs(),
            self.poll.as_millis()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick(Instant::now()).await;

            tokio::select! {
                _ = sleep(self.poll) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("snapshot scheduler lost its shutdown channel; stopping");
                        break;
                    }
                }
            }
        }

        info!("snapshot scheduler stopped");
        self.state
    }
}

fn whole_secs(now: Instant, since: Instant) -> u64 {
    now.saturating_duration_since(since).as_secs()
}
