//! Error types for segstore core.

use crate::reload::ReloadStep;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Broad classification of a [`CoreError`].
///
/// Administrative callers use this to decide how to surface a failure
/// without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required input was missing or invalid; nothing was changed.
    Precondition,
    /// A filesystem operation failed; recovery was attempted.
    Io,
    /// Segment data could not be loaded; the previous handle was kept.
    Load,
    /// A lock or reference-count contract was violated by the caller.
    Concurrency,
    /// The reload admission gate did not grant a slot in time.
    Admission,
    /// The instance is not in a state that accepts the operation.
    Lifecycle,
}

impl ErrorKind {
    /// Returns a stable, upper-case code for this kind.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Precondition => "PRECONDITION",
            Self::Io => "IO",
            Self::Load => "LOAD",
            Self::Concurrency => "CONCURRENCY",
            Self::Admission => "ADMISSION",
            Self::Lifecycle => "LIFECYCLE",
        }
    }
}

/// Errors that can occur in segstore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Segment directory layer error.
    #[error("storage error: {0}")]
    Storage(#[from] segstore_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No table configuration is registered for the table.
    #[error("table config not found: {table}")]
    TableConfigNotFound {
        /// Table name with type.
        table: String,
    },

    /// No schema is registered for the table.
    #[error("schema not found: {table}")]
    SchemaNotFound {
        /// Table name with type.
        table: String,
    },

    /// A table name is malformed or lacks a type suffix.
    #[error("invalid table name {name:?}: {reason}")]
    InvalidTableName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A segment name is malformed or collides with a reserved suffix.
    #[error("invalid segment name {name:?}: {reason}")]
    InvalidSegmentName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The segment's index directory is missing.
    #[error("segment directory does not exist: {}", path.display())]
    SegmentDirMissing {
        /// Expected directory.
        path: PathBuf,
    },

    /// The segment's index path exists but is not a directory.
    #[error("segment path is not a directory: {}", path.display())]
    NotADirectory {
        /// Offending path.
        path: PathBuf,
    },

    /// Segment data could not be loaded.
    #[error("failed to load segment {segment} of table {table}: {message}")]
    SegmentLoad {
        /// Table name with type.
        table: String,
        /// Segment name.
        segment: String,
        /// Description of the failure.
        message: String,
    },

    /// A reload step failed.
    #[error("reload of segment {segment} in table {table} failed at {step}: {source}")]
    Reload {
        /// Table name with type.
        table: String,
        /// Segment name.
        segment: String,
        /// The protocol step that failed.
        step: ReloadStep,
        /// Underlying failure.
        #[source]
        source: Box<CoreError>,
    },

    /// One or more segments of a bulk reload failed.
    #[error("reload of table {table} incomplete: {} segment(s) failed: {}", failed.len(), failed.join(", "))]
    ReloadIncomplete {
        /// Table name with type.
        table: String,
        /// Names of the failed segments.
        failed: Vec<String>,
    },

    /// Segment lock already held by the current thread.
    #[error("segment lock for {table}/{segment} is already held by this thread")]
    ReentrantLock {
        /// Table name with type.
        table: String,
        /// Segment name.
        segment: String,
    },

    /// A handle was released that is not currently acquired.
    #[error("invalid release of segment {segment} in table {table}: {message}")]
    InvalidRelease {
        /// Table name with type.
        table: String,
        /// Segment name.
        segment: String,
        /// Description of the violation.
        message: String,
    },

    /// The reload admission gate did not free a slot in time.
    #[error("timed out after {waited:?} waiting for a reload slot")]
    AdmissionTimeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// Another process holds the data directory lock.
    #[error("data directory locked: another process owns {}", path.display())]
    DataDirLocked {
        /// The locked data directory.
        path: PathBuf,
    },

    /// The instance has been shut down.
    #[error("instance is shut down")]
    InstanceShutDown,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a segment load error.
    pub fn segment_load(
        table: impl Into<String>,
        segment: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::SegmentLoad {
            table: table.into(),
            segment: segment.into(),
            message: message.into(),
        }
    }

    /// Wraps an error with the reload step it happened in.
    pub fn reload(
        table: impl Into<String>,
        segment: impl Into<String>,
        step: ReloadStep,
        source: CoreError,
    ) -> Self {
        Self::Reload {
            table: table.into(),
            segment: segment.into(),
            step,
            source: Box::new(source),
        }
    }

    /// Creates an invalid segment name error.
    pub fn invalid_segment_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSegmentName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid table name error.
    pub fn invalid_table_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTableName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(e) if e.is_corruption() => ErrorKind::Load,
            Self::Storage(_) | Self::Io(_) => ErrorKind::Io,
            Self::TableConfigNotFound { .. }
            | Self::SchemaNotFound { .. }
            | Self::InvalidTableName { .. }
            | Self::InvalidSegmentName { .. }
            | Self::SegmentDirMissing { .. }
            | Self::NotADirectory { .. } => ErrorKind::Precondition,
            Self::SegmentLoad { .. } => ErrorKind::Load,
            Self::Reload { source, .. } => source.kind(),
            Self::ReloadIncomplete { .. } => ErrorKind::Load,
            Self::ReentrantLock { .. } | Self::InvalidRelease { .. } => ErrorKind::Concurrency,
            Self::AdmissionTimeout { .. } => ErrorKind::Admission,
            Self::DataDirLocked { .. } | Self::InstanceShutDown | Self::InvalidOperation { .. } => {
                ErrorKind::Lifecycle
            }
        }
    }
}
