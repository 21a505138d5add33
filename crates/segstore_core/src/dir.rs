//! Instance data directory management.
//!
//! This module handles the file system layout of one server instance:
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK                        # Advisory lock, one owner process
//! ├─ events_OFFLINE/             # One directory per table
//! │  ├─ events_2024_01_01/       # One directory per segment
//! │  └─ events_2024_01_02.segment.bak/   # Interrupted reload
//! └─ clicks_REALTIME/
//! ```
//!
//! The LOCK file ensures only one process serves a data directory at a time.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// Owns an instance data directory for the lifetime of the process.
///
/// # Example
///
/// ```rust,ignore
/// let dir = InstanceDataDir::open(Path::new("/var/segstore/data"), true)?;
/// println!("segment dir: {:?}", dir.segment_dir("events_OFFLINE", "events_0"));
/// ```
#[derive(Debug)]
pub struct InstanceDataDir {
    path: PathBuf,
    _lock_file: File,
}

impl InstanceDataDir {
    /// Opens or creates a data directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another process holds the lock (returns `DataDirLocked`)
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::SegmentDirMissing {
                    path: path.to_path_buf(),
                });
            }
        }

        if !path.is_dir() {
            return Err(CoreError::NotADirectory {
                path: path.to_path_buf(),
            });
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DataDirLocked {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the data directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the directory of a table.
    #[must_use]
    pub fn table_dir(&self, table_name_with_type: &str) -> PathBuf {
        self.path.join(table_name_with_type)
    }

    /// Returns the primary directory of a segment.
    #[must_use]
    pub fn segment_dir(&self, table_name_with_type: &str, segment_name: &str) -> PathBuf {
        self.table_dir(table_name_with_type).join(segment_name)
    }

    /// Lists the table directories present on disk, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be read.
    pub fn table_names(&self) -> CoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
