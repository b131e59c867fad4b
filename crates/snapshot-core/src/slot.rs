use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::errors::SnapshotError;

/// The destination of a snapshot: the current backup plus the scratch path
/// holding the previous generation while a copy is in flight.
///
/// Outside of `replace_from`, only the current path is expected to exist.
/// During it, at least one of the two paths holds a complete backup once a
/// first snapshot has succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSlot {
    current: PathBuf,
    scratch: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Clean,
    RestoredScratch,
}

/// Result of one rotate-and-copy pass.
#[derive(Debug)]
pub struct CopyReport {
    /// Bytes copied, or the classified failure.
    pub outcome: Result<u64, SnapshotError>,
    /// Set when the copy completed; the scheduler measures intervals from it.
    pub copied_at: Option<Instant>,
    pub rotated: bool,
    pub restored: bool,
}

impl CopyReport {
    pub fn copied(bytes: u64, at: Instant) -> Self {
        Self {
            outcome: Ok(bytes),
            copied_at: Some(at),
            rotated: false,
            restored: false,
        }
    }

    pub fn failed(err: SnapshotError) -> Self {
        Self {
            outcome: Err(err),
            copied_at: None,
            rotated: false,
            restored: false,
        }
    }

    pub fn is_copied(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&SnapshotError> {
        self.outcome.as_ref().err()
    }
}

impl DestinationSlot {
    /// Slot at `current` with the conventional `{name}.bak` scratch path.
    pub fn new(current: impl Into<PathBuf>) -> Self {
        let current = current.into();
        let scratch = sibling_path(&current, "bak");
        Self { current, scratch }
    }

    pub fn current(&self) -> &Path {
        &self.current
    }

    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    /// `{name}.lock`, used to keep a second daemon off this slot.
    pub fn lock_path(&self) -> PathBuf {
        sibling_path(&self.current, "lock")
    }

    /// Put back a scratch file left behind by a process that died inside the
    /// rotation window. The scratch generation is known to be complete, the
    /// current file may not be.
    pub fn recover(&self) -> Result<Recovery, SnapshotError> {
        if !self.scratch.is_file() {
            return Ok(Recovery::Clean);
        }

        warn!(
            "found leftover scratch snapshot {}; restoring it over {}",
            self.scratch.display(),
            self.current.display()
        );
        fs::rename(&self.scratch, &self.current)
            .map_err(|err| SnapshotError::rotation("restoring leftover scratch file", err))?;
        Ok(Recovery::RestoredScratch)
    }

    /// Rotate the current backup aside, copy `source` into place, then drop
    /// or restore the rotated generation depending on the copy result.
    pub fn replace_from(&self, source: &Path) -> CopyReport {
        self.replace_with(source, |destination| fs::copy(source, destination))
    }

    pub(crate) fn replace_with<F>(&self, source: &Path, copy: F) -> CopyReport
    where
        F: FnOnce(&Path) -> io::Result<u64>,
    {
        if self.current.is_dir() {
            return self.reject(SnapshotError::DestinationIsDirectory(self.current.clone()));
        }
        if same_file(source, &self.current) {
            return self.reject(SnapshotError::SameFile(self.current.clone()));
        }

        let rotated = match self.rotate() {
            Ok(rotated) => rotated,
            Err(err) => return self.reject(err),
        };

        match copy(&self.current) {
            Ok(bytes) => {
                let copied_at = Instant::now();
                info!(
                    "snapshot written: {} -> {} ({} bytes)",
                    source.display(),
                    self.current.display(),
                    bytes
                );
                self.discard_scratch();
                CopyReport {
                    outcome: Ok(bytes),
                    copied_at: Some(copied_at),
                    rotated,
                    restored: false,
                }
            }
            Err(err) => {
                let err = SnapshotError::from_copy(source, &self.current, err);
                error!("snapshot copy failed ({}): {}", err.reason(), err);
                let restored = self.restore_scratch();
                if !restored {
                    self.discard_partial();
                }
                CopyReport {
                    outcome: Err(err),
                    copied_at: None,
                    rotated,
                    restored,
                }
            }
        }
    }

    fn reject(&self, err: SnapshotError) -> CopyReport {
        error!("snapshot copy failed ({}): {}", err.reason(), err);
        CopyReport::failed(err)
    }

    fn rotate(&self) -> Result<bool, SnapshotError> {
        if !self.current.is_file() {
            debug!("no current snapshot at {}; skipping rotation", self.current.display());
            return Ok(false);
        }
        fs::rename(&self.current, &self.scratch)
            .map_err(|err| SnapshotError::rotation("moving current snapshot to scratch", err))?;
        Ok(true)
    }

    fn discard_scratch(&self) {
        if !self.scratch.exists() {
            return;
        }
        match fs::remove_file(&self.scratch) {
            Ok(()) => debug!("removed scratch snapshot {}", self.scratch.display()),
            Err(err) => warn!(
                "failed to remove scratch snapshot {}: {}",
                self.scratch.display(),
                err
            ),
        }
    }

    fn restore_scratch(&self) -> bool {
        if !self.scratch.is_file() {
            return false;
        }
        match fs::rename(&self.scratch, &self.current) {
            Ok(()) => {
                info!("restored previous snapshot to {}", self.current.display());
                true
            }
            Err(err) => {
                error!(
                    "failed to restore previous snapshot from {}: {}",
                    self.scratch.display(),
                    err
                );
                false
            }
        }
    }

    // Reached when no earlier generation was put back: either nothing was
    // rotated aside, or the restore rename failed and the scratch file stays
    // as the recovery copy. Any file at the current path is from the failed
    // copy.
    fn discard_partial(&self) {
        if self.current.is_file() {
            if let Err(err) = fs::remove_file(&self.current) {
                warn!(
                    "failed to remove partial snapshot {}: {}",
                    self.current.display(),
                    err
                );
            }
        }
    }
}

fn sibling_path(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(extension);
    path.with_file_name(name)
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
