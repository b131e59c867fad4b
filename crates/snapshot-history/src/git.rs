use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::{CommandOutput, HistoryBackend, HistoryError, HistoryOp, StatusReport};

/// History backend driving the `git` command line inside one work tree.
#[derive(Debug, Clone)]
pub struct GitBackend {
    program: OsString,
    repo_dir: PathBuf,
    remote: Option<String>,
    branch: Option<String>,
}

impl GitBackend {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: OsString::from("git"),
            repo_dir: repo_dir.into(),
            remote: None,
            branch: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_remote(mut self, remote: Option<String>, branch: Option<String>) -> Self {
        self.remote = remote;
        self.branch = branch;
        self
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn run(&self, op: HistoryOp, args: &[&OsStr]) -> Result<CommandOutput, HistoryError> {
        debug!(
            "history {op}: {} {:?} in {}",
            self.program.to_string_lossy(),
            args,
            self.repo_dir.display()
        );
        let out = Command::new(&self.program)
            .args(args)
            .current_dir(&self.repo_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|source| HistoryError::Spawn {
                op,
                program: self.program.to_string_lossy().into_owned(),
                source,
            })?;

        let output = CommandOutput::from_raw(&out.stdout, &out.stderr);
        if !out.status.success() {
            return Err(HistoryError::Failed {
                op,
                code: out.status.code(),
                output,
            });
        }
        Ok(output)
    }

    /// Pathspec for `path` relative to the work tree, falling back to the
    /// path as given when it cannot be related to `repo_dir`.
    fn pathspec(&self, path: &Path) -> PathBuf {
        if let Ok(rel) = path.strip_prefix(&self.repo_dir) {
            if !rel.as_os_str().is_empty() {
                return rel.to_path_buf();
            }
        }

        let (Some(name), Ok(repo)) = (path.file_name(), self.repo_dir.canonicalize()) else {
            return path.to_path_buf();
        };
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        match parent.canonicalize() {
            Ok(parent) => match parent.strip_prefix(&repo) {
                Ok(rel) => rel.join(name),
                Err(_) => path.to_path_buf(),
            },
            Err(_) => path.to_path_buf(),
        }
    }

    /// Commits on the pushed revision that no remote-tracking branch of the
    /// publish remote contains. A remote never pushed to counts them all; a
    /// repository without commits counts none.
    fn unpublished_commits(&self) -> usize {
        let rev = self.branch.as_deref().unwrap_or("HEAD");
        let remotes = format!("--remotes={}", self.remote.as_deref().unwrap_or("origin"));
        let args = [
            OsStr::new("rev-list"),
            OsStr::new("--count"),
            OsStr::new(rev),
            OsStr::new("--not"),
            OsStr::new(&remotes),
        ];
        match self.run(HistoryOp::Status, &args) {
            Ok(output) => output.stdout.parse().unwrap_or(0),
            Err(err) => {
                debug!("history: no unpublished commits counted: {err}");
                0
            }
        }
    }

    fn push_args(&self) -> Vec<&OsStr> {
        let mut args: Vec<&OsStr> = vec![OsStr::new("push")];
        match (&self.remote, &self.branch) {
            (Some(remote), Some(branch)) => {
                args.push(OsStr::new(remote));
                args.push(OsStr::new(branch));
            }
            (Some(remote), None) => {
                args.push(OsStr::new(remote));
                args.push(OsStr::new("HEAD"));
            }
            (None, Some(branch)) => {
                args.push(OsStr::new("origin"));
                args.push(OsStr::new(branch));
            }
            (None, None) => {}
        }
        args
    }
}

impl HistoryBackend for GitBackend {
    fn status(&self, path: &Path) -> Result<StatusReport, HistoryError> {
        let spec = self.pathspec(path);
        let output = self.run(
            HistoryOp::Status,
            &[
                OsStr::new("status"),
                OsStr::new("--porcelain"),
                OsStr::new("--"),
                spec.as_os_str(),
            ],
        )?;
        Ok(StatusReport {
            changed: !output.stdout.is_empty(),
            unpublished: self.unpublished_commits(),
            output,
        })
    }

    fn stage(&self, path: &Path) -> Result<CommandOutput, HistoryError> {
        let spec = self.pathspec(path);
        self.run(
            HistoryOp::Stage,
            &[OsStr::new("add"), OsStr::new("--"), spec.as_os_str()],
        )
    }

    fn commit(&self, message: &str) -> Result<CommandOutput, HistoryError> {
        self.run(
            HistoryOp::Commit,
            &[OsStr::new("commit"), OsStr::new("-m"), OsStr::new(message)],
        )
    }

    fn publish(&self) -> Result<CommandOutput, HistoryError> {
        self.run(HistoryOp::Publish, &self.push_args())
    }
}
