use std::io::{self, Write};
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};

use snapshot_history::{CommandOutput, HistoryBackend, HistoryError, HistoryOp, StatusReport};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
pub(crate) struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    pub(crate) fn contents(&self) -> String {
        let guard = self.buffer.lock().expect("log buffer poisoned");
        String::from_utf8_lossy(&guard).into_owned()
    }
}

pub(crate) struct CapturedWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .expect("log buffer poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedWriter {
            buffer: self.buffer.clone(),
        }
    }
}

/// Run `f` with a subscriber that records formatted log lines.
pub(crate) fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    (value, logs.contents())
}

/// History backend that records every call and fails on request.
#[derive(Default)]
pub(crate) struct RecordingBackend {
    pub(crate) changed: bool,
    pub(crate) unpublished: usize,
    pub(crate) fail_on: Vec<HistoryOp>,
    calls: Mutex<Vec<String>>,
}

impl RecordingBackend {
    pub(crate) fn with_changes() -> Self {
        Self {
            changed: true,
            ..Self::default()
        }
    }

    /// Clean work tree with `count` commits the remote has not received.
    pub(crate) fn unpublished(count: usize) -> Self {
        Self {
            unpublished: count,
            ..Self::default()
        }
    }

    pub(crate) fn failing(mut self, op: HistoryOp) -> Self {
        self.fail_on.push(op);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls poisoned").clone()
    }

    pub(crate) fn count(&self, op: HistoryOp) -> usize {
        let prefix = op.as_str();
        self.calls()
            .iter()
            .filter(|call| call.split(' ').next() == Some(prefix))
            .count()
    }

    fn record(&self, op: HistoryOp, detail: &str) -> Result<CommandOutput, HistoryError> {
        self.calls
            .lock()
            .expect("calls poisoned")
            .push(format!("{op} {detail}").trim_end().to_string());
        if self.fail_on.contains(&op) {
            return Err(HistoryError::Failed {
                op,
                code: Some(1),
                output: CommandOutput::new("", format!("{op} rejected")),
            });
        }
        Ok(CommandOutput::default())
    }
}

impl HistoryBackend for RecordingBackend {
    fn status(&self, path: &Path) -> Result<StatusReport, HistoryError> {
        let output = self.record(HistoryOp::Status, &path.display().to_string())?;
        Ok(StatusReport {
            changed: self.changed,
            unpublished: self.unpublished,
            output,
        })
    }

    fn stage(&self, path: &Path) -> Result<CommandOutput, HistoryError> {
        self.record(HistoryOp::Stage, &path.display().to_string())
    }

    fn commit(&self, message: &str) -> Result<CommandOutput, HistoryError> {
        self.record(HistoryOp::Commit, message)
    }

    fn publish(&self) -> Result<CommandOutput, HistoryError> {
        self.record(HistoryOp::Publish, "")
    }
}

pub(crate) fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

pub(crate) fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
}

/// Fresh work tree with a committer identity and unsigned commits.
pub(crate) fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.name", "snapshotd"]);
    git(dir, &["config", "user.email", "snapshotd@localhost"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}
