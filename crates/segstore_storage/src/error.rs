//! Error types for segment directory operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while touching segment directories.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A path expected to exist does not.
    #[error("path does not exist: {}", .0.display())]
    NotFound(PathBuf),

    /// A path expected to be a directory is something else.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// A rename target is already occupied.
    #[error("rename target already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// The segment manifest could not be parsed.
    #[error("invalid segment manifest in {}: {source}", path.display())]
    Manifest {
        /// Segment directory holding the manifest.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Segment content does not match the checksum in its manifest.
    #[error("checksum mismatch in {}: expected {expected:08x}, got {actual:08x}", path.display())]
    ChecksumMismatch {
        /// Segment directory that failed verification.
        path: PathBuf,
        /// Checksum recorded in the manifest.
        expected: u32,
        /// Checksum computed from the column files.
        actual: u32,
    },

    /// The segment directory is structurally corrupted.
    #[error("segment corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Returns true if this error means the segment data itself is bad,
    /// as opposed to the filesystem refusing an operation.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Manifest { .. } | Self::ChecksumMismatch { .. } | Self::Corrupted(_)
        )
    }
}
