use std::path::Path;

use snapshot_history::{CommandOutput, HistoryBackend, HistoryError, HistoryOp};
use tracing::{debug, error, info};

/// How the stage → commit → publish chain reacts to a failed step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconcilePolicy {
    /// Stop at the first failed step; the next interval retries from status.
    #[default]
    StopOnFailure,
    /// Attempt every step regardless of earlier failures.
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub message: String,
    pub publish: bool,
    pub policy: ReconcilePolicy,
}

impl ReconcileOptions {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            publish: true,
            policy: ReconcilePolicy::default(),
        }
    }

    /// Default commit message for snapshots of `path`.
    pub fn default_message(path: &Path) -> String {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        format!("Automatic snapshot of {name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No history backend configured, or the transaction never got this far.
    Skipped,
    StatusFailed,
    NoChanges,
    /// Nothing new to commit, but earlier commits still had to be published.
    PendingPublish {
        publish: StepResult,
    },
    Applied {
        stage: StepResult,
        commit: StepResult,
        publish: StepResult,
    },
}

impl ReconcileOutcome {
    /// True when the history now holds the snapshot (or had nothing to add).
    pub fn is_settled(&self) -> bool {
        match self {
            ReconcileOutcome::NoChanges => true,
            ReconcileOutcome::PendingPublish { publish } => *publish == StepResult::Done,
            ReconcileOutcome::Applied {
                stage,
                commit,
                publish,
            } => {
                *stage == StepResult::Done
                    && *commit == StepResult::Done
                    && *publish != StepResult::Failed
            }
            ReconcileOutcome::Skipped | ReconcileOutcome::StatusFailed => false,
        }
    }
}

/// Bring the history backend in line with the snapshot file at `path`.
pub fn reconcile(
    backend: &dyn HistoryBackend,
    path: &Path,
    options: &ReconcileOptions,
) -> ReconcileOutcome {
    let status = match backend.status(path) {
        Ok(status) => status,
        Err(err) => {
            error!("history status failed: {err}");
            return ReconcileOutcome::StatusFailed;
        }
    };

    let mut pipeline = Pipeline {
        policy: options.policy,
        halted: false,
    };

    if !status.changed {
        if options.publish && status.unpublished > 0 {
            info!(
                "history: no changes for {}; publishing {} pending commit(s)",
                path.display(),
                status.unpublished
            );
            let publish = pipeline.step(HistoryOp::Publish, || backend.publish());
            return ReconcileOutcome::PendingPublish { publish };
        }
        info!("history: no changes for {}", path.display());
        return ReconcileOutcome::NoChanges;
    }
    debug!("history status: {}", status.output.summary());

    let stage = pipeline.step(HistoryOp::Stage, || backend.stage(path));
    let commit = pipeline.step(HistoryOp::Commit, || backend.commit(&options.message));
    let publish = if options.publish {
        pipeline.step(HistoryOp::Publish, || backend.publish())
    } else {
        debug!("history publish disabled");
        StepResult::Skipped
    };

    ReconcileOutcome::Applied {
        stage,
        commit,
        publish,
    }
}

struct Pipeline {
    policy: ReconcilePolicy,
    halted: bool,
}

impl Pipeline {
    fn step<F>(&mut self, op: HistoryOp, run: F) -> StepResult
    where
        F: FnOnce() -> Result<CommandOutput, HistoryError>,
    {
        if self.halted {
            info!("history {op} skipped after earlier failure");
            return StepResult::Skipped;
        }

        match run() {
            Ok(output) => {
                info!("history {op} ok: {}", output.summary());
                StepResult::Done
            }
            Err(err) => {
                error!("history {op} failed: {err}");
                if self.policy == ReconcilePolicy::StopOnFailure {
                    self.halted = true;
                }
                StepResult::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ReconcileOptions, ReconcileOutcome, ReconcilePolicy, StepResult, reconcile};
    use crate::testing::{RecordingBackend, capture_logs};
    use snapshot_history::HistoryOp;
    use std::path::Path;

    fn options(policy: ReconcilePolicy) -> ReconcileOptions {
        ReconcileOptions {
            message: "Automatic snapshot of db_save.json".to_string(),
            publish: true,
            policy,
        }
    }

    #[test]
    fn unchanged_history_issues_only_status() {
        let backend = RecordingBackend::default();
        let path = Path::new("db_save.json");

        for _ in 0..3 {
            let (outcome, logs) = capture_logs(|| {
                reconcile(&backend, path, &options(ReconcilePolicy::StopOnFailure))
            });
            assert_eq!(outcome, ReconcileOutcome::NoChanges);
            assert!(logs.contains("no changes"));
        }

        assert_eq!(backend.count(HistoryOp::Status), 3);
        assert_eq!(backend.calls().len(), 3);
    }

    #[test]
    fn change_runs_stage_commit_publish_in_order() {
        let backend = RecordingBackend::with_changes();
        let outcome = reconcile(
            &backend,
            Path::new("db_save.json"),
            &options(ReconcilePolicy::StopOnFailure),
        );

        assert!(outcome.is_settled());
        assert_eq!(
            backend.calls(),
            vec![
                "status db_save.json",
                "stage db_save.json",
                "commit Automatic snapshot of db_save.json",
                "publish",
            ]
        );
    }

    #[test]
    fn stop_on_failure_halts_after_failed_stage() {
        let backend = RecordingBackend::with_changes().failing(HistoryOp::Stage);
        let (outcome, logs) = capture_logs(|| {
            reconcile(
                &backend,
                Path::new("db_save.json"),
                &options(ReconcilePolicy::StopOnFailure),
            )
        });

        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                stage: StepResult::Failed,
                commit: StepResult::Skipped,
                publish: StepResult::Skipped,
            }
        );
        assert_eq!(backend.count(HistoryOp::Commit), 0);
        assert_eq!(backend.count(HistoryOp::Publish), 0);
        assert!(logs.contains("stage rejected"), "logs: {logs}");
    }

    #[test]
    fn best_effort_attempts_every_step() {
        let backend = RecordingBackend::with_changes().failing(HistoryOp::Stage);
        let outcome = reconcile(
            &backend,
            Path::new("db_save.json"),
            &options(ReconcilePolicy::BestEffort),
        );

        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                stage: StepResult::Failed,
                commit: StepResult::Done,
                publish: StepResult::Done,
            }
        );
        assert!(!outcome.is_settled());
        assert_eq!(backend.count(HistoryOp::Commit), 1);
        assert_eq!(backend.count(HistoryOp::Publish), 1);
    }

    #[test]
    fn failed_status_stops_before_any_write() {
        let backend = RecordingBackend::with_changes().failing(HistoryOp::Status);
        let outcome = reconcile(
            &backend,
            Path::new("db_save.json"),
            &options(ReconcilePolicy::BestEffort),
        );

        assert_eq!(outcome, ReconcileOutcome::StatusFailed);
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn commits_left_unpublished_are_pushed_on_the_next_run() {
        let backend = RecordingBackend::with_changes().failing(HistoryOp::Publish);
        let path = Path::new("db_save.json");
        let opts = options(ReconcilePolicy::StopOnFailure);

        let first = reconcile(&backend, path, &opts);
        assert!(!first.is_settled());

        let backend = RecordingBackend::unpublished(1);
        let (second, logs) = capture_logs(|| reconcile(&backend, path, &opts));

        assert_eq!(
            second,
            ReconcileOutcome::PendingPublish {
                publish: StepResult::Done
            }
        );
        assert!(second.is_settled());
        assert_eq!(backend.calls(), vec!["status db_save.json", "publish"]);
        assert!(logs.contains("1 pending commit(s)"), "logs: {logs}");
    }

    #[test]
    fn pending_commits_stay_local_when_publish_is_disabled() {
        let backend = RecordingBackend::unpublished(2);
        let mut opts = options(ReconcilePolicy::StopOnFailure);
        opts.publish = false;

        let outcome = reconcile(&backend, Path::new("db_save.json"), &opts);

        assert_eq!(outcome, ReconcileOutcome::NoChanges);
        assert_eq!(backend.count(HistoryOp::Publish), 0);
    }

    #[test]
    fn publish_can_be_disabled() {
        let backend = RecordingBackend::with_changes();
        let mut opts = options(ReconcilePolicy::StopOnFailure);
        opts.publish = false;

        let outcome = reconcile(&backend, Path::new("db_save.json"), &opts);

        assert!(outcome.is_settled());
        assert_eq!(backend.count(HistoryOp::Publish), 0);
    }

    #[test]
    fn default_message_names_the_file() {
        assert_eq!(
            ReconcileOptions::default_message(Path::new("/srv/json-server/db_save.json")),
            "Automatic snapshot of db_save.json"
        );
    }
}
