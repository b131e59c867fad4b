use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures of the rotate-and-copy phase. None of these are fatal to the
/// daemon; they are logged and the transaction moves on to reconciliation.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("source file does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("permission denied while {context}: {source}")]
    PermissionDenied {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("source and destination are the same file: {}", .0.display())]
    SameFile(PathBuf),

    #[error("destination is a directory: {}", .0.display())]
    DestinationIsDirectory(PathBuf),

    #[error("rotation failed while {context}: {source}")]
    Rotation {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl SnapshotError {
    pub fn io(context: &'static str, source: io::Error) -> Self {
        Self::Io { context, source }
    }

    pub fn rotation(context: &'static str, source: io::Error) -> Self {
        Self::Rotation { context, source }
    }

    /// Stable short label used in log records.
    pub fn reason(&self) -> &'static str {
        match self {
            SnapshotError::SourceMissing(_) => "source-missing",
            SnapshotError::PermissionDenied { .. } => "permission-denied",
            SnapshotError::SameFile(_) => "same-file",
            SnapshotError::DestinationIsDirectory(_) => "destination-is-directory",
            SnapshotError::Rotation { .. } => "rotation",
            SnapshotError::Io { .. } => "other",
        }
    }

    /// Classify an error raised while copying `source` onto `destination`.
    pub(crate) fn from_copy(source: &Path, destination: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound if !source.exists() => {
                SnapshotError::SourceMissing(source.to_path_buf())
            }
            io::ErrorKind::PermissionDenied => SnapshotError::PermissionDenied {
                context: "copying source",
                source: err,
            },
            io::ErrorKind::IsADirectory => {
                SnapshotError::DestinationIsDirectory(destination.to_path_buf())
            }
            _ => SnapshotError::io("copying source", err),
        }
    }
}
