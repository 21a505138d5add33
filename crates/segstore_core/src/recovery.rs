//! Crash recovery for interrupted reloads.
//!
//! A reload moves a segment directory through three on-disk shapes, told
//! apart purely by directory names:
//!
//! ```text
//! stable       <seg>/
//! in-flight    <seg>.segment.bak/   (+ <seg>/ once the copy has started)
//! finalizing   <seg>.segment.tmp/   + <seg>/
//! ```
//!
//! [`recover_segment_dir`] turns any of them back into *stable*. It is
//! idempotent and runs after every reload, on startup for every table
//! directory, and on demand from the CLI.

use crate::error::CoreResult;
use segstore_storage::{format, layout, SegmentFs};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// On-disk shape of one segment directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReloadState {
    /// Only the primary directory (or nothing) exists.
    Stable,
    /// A backup exists; the primary may or may not.
    InFlight {
        /// Whether the primary directory exists.
        primary_present: bool,
    },
    /// The backup has been renamed to the temp suffix.
    Finalizing,
}

impl ReloadState {
    /// Returns true if nothing needs to be recovered.
    #[must_use]
    pub const fn is_stable(self) -> bool {
        matches!(self, Self::Stable)
    }
}

impl fmt::Display for ReloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::InFlight {
                primary_present: true,
            } => write!(f, "in-flight (primary present)"),
            Self::InFlight {
                primary_present: false,
            } => write!(f, "in-flight (primary missing)"),
            Self::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// A repair performed by recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecoveryAction {
    /// Deleted a leftover temp directory.
    RemovedTemp,
    /// Deleted the backup; the primary was kept.
    RemovedBackup,
    /// Deleted a primary that failed verification.
    DiscardedPrimary,
    /// Renamed the backup back to the primary path.
    RestoredBackup,
}

/// Outcome of recovering one segment directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Primary directory of the segment.
    pub index_dir: PathBuf,
    /// Shape found before recovery.
    pub state: ReloadState,
    /// Repairs performed, in order.
    pub actions: Vec<RecoveryAction>,
}

impl RecoveryReport {
    /// Returns true if nothing had to be repaired.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Inspects the on-disk shape of a segment directory without changing it.
#[must_use]
pub fn inspect_reload_state(fs: &dyn SegmentFs, index_dir: &Path) -> ReloadState {
    if fs.exists(&layout::backup_dir(index_dir)) {
        ReloadState::InFlight {
            primary_present: fs.exists(index_dir),
        }
    } else if fs.exists(&layout::temp_dir(index_dir)) {
        ReloadState::Finalizing
    } else {
        ReloadState::Stable
    }
}

/// Brings a segment directory back to the stable shape.
///
/// - A temp directory is deleted.
/// - With a backup and a primary, the primary is kept and the backup
///   deleted. When `verify` is set, the primary is kept only if its
///   checksum verifies; otherwise it is deleted and the backup restored.
/// - With a backup and no primary, the backup is renamed to the primary.
///
/// Must be called with the segment's lock held, or before the segment is
/// served.
///
/// # Errors
///
/// Returns an error if a rename or delete fails. Recovery can be retried.
pub fn recover_segment_dir(
    fs: &dyn SegmentFs,
    index_dir: &Path,
    verify: bool,
) -> CoreResult<RecoveryReport> {
    let state = inspect_reload_state(fs, index_dir);
    let backup = layout::backup_dir(index_dir);
    let temp = layout::temp_dir(index_dir);
    let mut actions = Vec::new();

    if fs.exists(&temp) {
        fs.remove_dir_all(&temp)?;
        actions.push(RecoveryAction::RemovedTemp);
    }

    if fs.exists(&backup) {
        if fs.exists(index_dir) {
            let keep_primary = if verify {
                match format::verify_segment_dir(index_dir) {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(
                            dir = %index_dir.display(),
                            error = %e,
                            "primary directory failed verification, restoring backup"
                        );
                        false
                    }
                }
            } else {
                true
            };

            if keep_primary {
                fs.remove_dir_all(&backup)?;
                actions.push(RecoveryAction::RemovedBackup);
            } else {
                fs.remove_dir_all(index_dir)?;
                actions.push(RecoveryAction::DiscardedPrimary);
                fs.rename(&backup, index_dir)?;
                actions.push(RecoveryAction::RestoredBackup);
            }
        } else {
            fs.rename(&backup, index_dir)?;
            actions.push(RecoveryAction::RestoredBackup);
        }
    }

    if !actions.is_empty() {
        tracing::info!(
            dir = %index_dir.display(),
            %state,
            ?actions,
            "recovered segment directory"
        );
    }

    Ok(RecoveryReport {
        index_dir: index_dir.to_path_buf(),
        state,
        actions,
    })
}

/// A segment or table directory the sweep could not repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryFailure {
    /// Primary directory of the segment, or the table directory if it
    /// could not be listed.
    pub dir: PathBuf,
    /// Rendered error.
    pub error: String,
}

/// Outcome of sweeping a data directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataDirRecovery {
    /// Segments that had to be repaired.
    pub reports: Vec<RecoveryReport>,
    /// Segments left unrepaired, each with its error.
    pub failures: Vec<RecoveryFailure>,
}

impl DataDirRecovery {
    /// Returns true if every pending segment was repaired.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Recovers every interrupted reload under a data directory.
///
/// Each sub-directory of `data_dir` is treated as a table directory and
/// scanned for backup and temp directories. A segment that cannot be
/// repaired is recorded in [`DataDirRecovery::failures`] and the sweep
/// moves on; only segments that needed repair are reported.
///
/// # Errors
///
/// Returns an error only if `data_dir` itself cannot be listed.
pub fn recover_data_dir(
    fs: &dyn SegmentFs,
    data_dir: &Path,
    verify: bool,
) -> CoreResult<DataDirRecovery> {
    let mut sweep = DataDirRecovery::default();

    for table in fs.list_dir(data_dir)? {
        let table_dir = data_dir.join(&table);
        if !fs.is_dir(&table_dir) {
            continue;
        }

        let names = match fs.list_dir(&table_dir) {
            Ok(names) => names,
            Err(e) => {
                tracing::error!(dir = %table_dir.display(), error = %e, "failed to list table directory");
                sweep.failures.push(RecoveryFailure {
                    dir: table_dir,
                    error: e.to_string(),
                });
                continue;
            }
        };

        // Stray files carrying a reserved suffix are not reload leftovers.
        let pending: BTreeSet<String> = names
            .iter()
            .filter(|name| fs.is_dir(&table_dir.join(name)))
            .filter_map(|name| layout::primary_name_of(name))
            .map(str::to_string)
            .collect();

        for segment in pending {
            let index_dir = table_dir.join(&segment);
            match recover_segment_dir(fs, &index_dir, verify) {
                Ok(report) if report.is_noop() => {}
                Ok(report) => sweep.reports.push(report),
                Err(e) => {
                    tracing::error!(
                        dir = %index_dir.display(),
                        error = %e,
                        "failed to recover segment directory"
                    );
                    sweep.failures.push(RecoveryFailure {
                        dir: index_dir,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    Ok(sweep)
}
