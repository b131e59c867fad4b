mod error;
mod git;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub use error::HistoryError;
pub use git::GitBackend;

/// The four operations snapshotd drives against a history backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryOp {
    Status,
    Stage,
    Commit,
    Publish,
}

impl HistoryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryOp::Status => "status",
            HistoryOp::Stage => "stage",
            HistoryOp::Commit => "commit",
            HistoryOp::Publish => "publish",
        }
    }
}

impl fmt::Display for HistoryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured text of a single backend command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn from_raw(stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            stdout: String::from_utf8_lossy(stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }

    /// Single-line rendering for log records.
    pub fn summary(&self) -> String {
        let joined = match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, true) => return "<no output>".to_string(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        };
        joined
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// True when the backend reports pending changes for the queried path.
    pub changed: bool,
    /// Local commits the publish target has not received yet.
    pub unpublished: usize,
    pub output: CommandOutput,
}

/// A versioned history that snapshot files are archived into.
///
/// Calls are synchronous and may block on external processes; callers run
/// them off the async runtime.
pub trait HistoryBackend: Send + Sync {
    fn status(&self, path: &Path) -> Result<StatusReport, HistoryError>;

    fn stage(&self, path: &Path) -> Result<CommandOutput, HistoryError>;

    fn commit(&self, message: &str) -> Result<CommandOutput, HistoryError>;

    fn publish(&self) -> Result<CommandOutput, HistoryError>;
}

impl<T: HistoryBackend + ?Sized> HistoryBackend for Arc<T> {
    fn status(&self, path: &Path) -> Result<StatusReport, HistoryError> {
        (**self).status(path)
    }

    fn stage(&self, path: &Path) -> Result<CommandOutput, HistoryError> {
        (**self).stage(path)
    }

    fn commit(&self, message: &str) -> Result<CommandOutput, HistoryError> {
        (**self).commit(message)
    }

    fn publish(&self) -> Result<CommandOutput, HistoryError> {
        (**self).publish()
    }
}

impl<T: HistoryBackend + ?Sized> HistoryBackend for Box<T> {
    fn status(&self, path: &Path) -> Result<StatusReport, HistoryError> {
        (**self).status(path)
    }

    fn stage(&self, path: &Path) -> Result<CommandOutput, HistoryError> {
        (**self).stage(path)
    }

    fn commit(&self, message: &str) -> Result<CommandOutput, HistoryError> {
        (**self).commit(message)
    }

    fn publish(&self) -> Result<CommandOutput, HistoryError> {
        (**self).publish()
    }
}

#[cfg(test)]
mod tests {
    use super::CommandOutput;

    #[test]
    fn summary_joins_streams_on_one_line() {
        let output = CommandOutput::new("M  db_save.json\n", "warning: LF will be replaced\n");
        assert_eq!(
            output.summary(),
            "M  db_save.json | warning: LF will be replaced"
        );
    }

    #[test]
    fn summary_marks_silent_commands() {
        assert_eq!(CommandOutput::default().summary(), "<no output>");
        assert!(CommandOutput::from_raw(b"  \n", b"").is_empty());
    }
}
