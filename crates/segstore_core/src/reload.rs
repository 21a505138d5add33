//! Crash-safe hot reload of a persisted segment.
//!
//! The reload replaces a segment's in-memory handle with one freshly loaded
//! from its directory, while queries keep running against the old handle:
//!
//! 1. `Validate` - the segment directory exists and is a directory
//! 2. `Backup`   - rename `<seg>` to `<seg>.segment.bak`
//! 3. `Copy`     - copy the backup back to `<seg>`
//! 4. `Load`     - load a new handle from `<seg>`
//! 5. `Swap`     - replace the handle in the table collection
//! 6. `Finalize` - rename the backup to `<seg>.segment.tmp`
//! 7. `Cleanup`  - delete the temp directory (best effort)
//!
//! Recovery runs on every exit path before the segment lock is released.
//! A failed copy removes its partial output first, so recovery restores
//! the backup.

use crate::catalog::Schema;
use crate::config::IndexLoadingConfig;
use crate::error::{CoreError, CoreResult};
use crate::lock::SegmentLockGuard;
use crate::recovery::{self, RecoveryReport};
use crate::segment::{Segment, SegmentLoader};
use crate::stats::InstanceStats;
use crate::table::TableSegments;
use segstore_storage::{layout, SegmentFs};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// A step of the reload protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReloadStep {
    /// Checking the segment directory.
    Validate,
    /// Renaming the primary to the backup path.
    Backup,
    /// Copying the backup to the primary path.
    Copy,
    /// Loading the new handle.
    Load,
    /// Swapping the handle in memory.
    Swap,
    /// Renaming the backup to the temp path.
    Finalize,
    /// Deleting the temp directory.
    Cleanup,
    /// Post-reload recovery.
    Recover,
}

impl fmt::Display for ReloadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validate => "validate",
            Self::Backup => "backup",
            Self::Copy => "copy",
            Self::Load => "load",
            Self::Swap => "swap",
            Self::Finalize => "finalize",
            Self::Cleanup => "cleanup",
            Self::Recover => "recover",
        };
        f.write_str(name)
    }
}

/// Why a reload did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// The segment is not loaded in this table.
    NotLoaded,
    /// The segment is still consuming from a stream.
    Consuming,
    /// The segment has no on-disk directory.
    NotPersisted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotLoaded => write!(f, "segment not loaded"),
            Self::Consuming => write!(f, "consuming segment"),
            Self::NotPersisted => write!(f, "segment not persisted"),
        }
    }
}

/// Result of a single-segment reload that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ReloadOutcome {
    /// The handle was replaced.
    Reloaded {
        /// Row count of the new handle.
        total_docs: u64,
        /// Bytes copied from the backup.
        bytes_copied: u64,
    },
    /// Nothing was done.
    Skipped(SkipReason),
}

impl ReloadOutcome {
    /// Returns true if the reload was a no-op.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// Per-segment results of reloading a whole table.
#[derive(Debug)]
pub struct ReloadSummary {
    /// Table name with type.
    pub table: String,
    /// Segments whose handle was replaced.
    pub reloaded: Vec<String>,
    /// Segments skipped, with the reason.
    pub skipped: Vec<(String, SkipReason)>,
    /// Segments that failed, with the error.
    pub failed: Vec<(String, CoreError)>,
}

impl ReloadSummary {
    pub(crate) fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            reloaded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, segment: String, result: CoreResult<ReloadOutcome>) {
        match result {
            Ok(ReloadOutcome::Reloaded { .. }) => self.reloaded.push(segment),
            Ok(ReloadOutcome::Skipped(reason)) => self.skipped.push((segment, reason)),
            Err(e) => self.failed.push((segment, e)),
        }
    }

    /// Returns true if no segment failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Converts a summary with failures into [`CoreError::ReloadIncomplete`].
    ///
    /// # Errors
    ///
    /// Returns the aggregate error if any segment failed.
    pub fn into_result(self) -> CoreResult<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(CoreError::ReloadIncomplete {
                table: self.table,
                failed: self.failed.into_iter().map(|(name, _)| name).collect(),
            })
        }
    }
}

/// Runs the reload protocol for segments of one table.
pub struct SegmentReloader<'a> {
    fs: &'a dyn SegmentFs,
    loader: &'a dyn SegmentLoader,
    stats: &'a InstanceStats,
    verify_on_recovery: bool,
}

impl<'a> SegmentReloader<'a> {
    /// Creates a reloader.
    #[must_use]
    pub fn new(
        fs: &'a dyn SegmentFs,
        loader: &'a dyn SegmentLoader,
        stats: &'a InstanceStats,
        verify_on_recovery: bool,
    ) -> Self {
        Self {
            fs,
            loader,
            stats,
            verify_on_recovery,
        }
    }

    /// Reloads one segment of `table`.
    ///
    /// The caller must hold the segment's lock; `lock` is checked against
    /// the segment being reloaded.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Reload`] naming the failed step. The previous
    /// handle stays in place and the directory is left stable.
    pub fn reload(
        &self,
        lock: &SegmentLockGuard,
        table: &TableSegments,
        segment_name: &str,
        config: &IndexLoadingConfig,
        schema: &Schema,
    ) -> CoreResult<ReloadOutcome> {
        let table_name = table.table_name();
        if !lock.covers(table_name, segment_name) {
            return Err(CoreError::invalid_operation(format!(
                "reload of {table_name}/{segment_name} requires its segment lock, got {}",
                lock.key()
            )));
        }

        let index_dir = match self.current_index_dir(table, segment_name) {
            Ok(dir) => dir,
            Err(reason) => {
                tracing::info!(
                    table = %table_name,
                    segment = %segment_name,
                    %reason,
                    "skipping reload"
                );
                self.stats.record_reload_skipped();
                return Ok(ReloadOutcome::Skipped(reason));
            }
        };

        tracing::info!(table = %table_name, segment = %segment_name, "reloading segment");

        let result = self.run(table, segment_name, &index_dir, config, schema);
        let recovered = self.recover(&index_dir);

        let outcome = match (result, recovered) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(CoreError::reload(
                table_name,
                segment_name,
                ReloadStep::Recover,
                e,
            )),
            (Ok(outcome), Ok(_)) => Ok(outcome),
        };

        match &outcome {
            Ok(_) => {
                self.stats.record_reload_succeeded();
                tracing::info!(table = %table_name, segment = %segment_name, "reloaded segment");
            }
            Err(e) => {
                self.stats.record_reload_failed();
                tracing::error!(
                    table = %table_name,
                    segment = %segment_name,
                    error = %e,
                    "failed to reload segment"
                );
            }
        }
        outcome
    }

    fn current_index_dir(
        &self,
        table: &TableSegments,
        segment_name: &str,
    ) -> Result<PathBuf, SkipReason> {
        let current = table
            .acquire_segment(segment_name)
            .ok_or(SkipReason::NotLoaded)?;
        match &*current {
            Segment::Consuming(_) => Err(SkipReason::Consuming),
            Segment::Immutable(segment) => segment
                .index_dir()
                .map(Path::to_path_buf)
                .ok_or(SkipReason::NotPersisted),
        }
    }

    fn run(
        &self,
        table: &TableSegments,
        segment_name: &str,
        index_dir: &Path,
        config: &IndexLoadingConfig,
        schema: &Schema,
    ) -> CoreResult<ReloadOutcome> {
        let table_name = table.table_name();
        let step_err = |step: ReloadStep, e: CoreError| {
            CoreError::reload(table_name, segment_name, step, e)
        };

        if !self.fs.is_dir(index_dir) {
            let err = if self.fs.exists(index_dir) {
                CoreError::NotADirectory {
                    path: index_dir.to_path_buf(),
                }
            } else {
                CoreError::SegmentDirMissing {
                    path: index_dir.to_path_buf(),
                }
            };
            return Err(step_err(ReloadStep::Validate, err));
        }

        let backup = layout::backup_dir(index_dir);
        self.fs
            .rename(index_dir, &backup)
            .map_err(|e| step_err(ReloadStep::Backup, e.into()))?;

        let bytes_copied = match self.fs.copy_dir(&backup, index_dir) {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(cleanup) = self.fs.remove_dir_all(index_dir) {
                    tracing::warn!(
                        dir = %index_dir.display(),
                        error = %cleanup,
                        "failed to remove partial copy"
                    );
                }
                return Err(step_err(ReloadStep::Copy, e.into()));
            }
        };

        let segment = self
            .loader
            .load(table_name, segment_name, index_dir, config, Some(schema))
            .map_err(|e| step_err(ReloadStep::Load, e))?;
        let total_docs = segment.metadata().total_docs;

        table.add_segment(segment);

        let temp = layout::temp_dir(index_dir);
        self.fs
            .rename(&backup, &temp)
            .map_err(|e| step_err(ReloadStep::Finalize, e.into()))?;

        if let Err(e) = self.fs.remove_dir_all(&temp) {
            tracing::warn!(
                dir = %temp.display(),
                error = %e,
                "failed to delete temp directory, will retry on recovery"
            );
        }

        Ok(ReloadOutcome::Reloaded {
            total_docs,
            bytes_copied,
        })
    }

    fn recover(&self, index_dir: &Path) -> CoreResult<RecoveryReport> {
        let report = recovery::recover_segment_dir(self.fs, index_dir, self.verify_on_recovery)?;
        if !report.is_noop() {
            self.stats.record_recovery();
        }
        Ok(report)
    }
}

impl fmt::Debug for SegmentReloader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentReloader")
            .field("fs", &self.fs)
            .field("verify_on_recovery", &self.verify_on_recovery)
            .finish()
    }
}
