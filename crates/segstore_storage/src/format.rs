//! Segment directory format.
//!
//! A persisted segment is a directory holding one manifest and one file
//! per column:
//!
//! ```text
//! <segment>/
//! ├─ metadata.json     # SegmentManifest
//! ├─ <column_a>.col    # Opaque column bytes
//! └─ <column_b>.col
//! ```
//!
//! Column bytes are opaque at this layer. The manifest carries a CRC32 over
//! every column (name and content, in name order) so that a reader can tell
//! a complete segment from a truncated or partially copied one.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the manifest file inside a segment directory.
pub const MANIFEST_FILE: &str = "metadata.json";

/// Extension of column files.
pub const COLUMN_FILE_EXT: &str = "col";

/// Current segment format version.
pub const FORMAT_VERSION: u32 = 1;

/// Metadata persisted alongside a segment's column files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentManifest {
    /// Format version the segment was written with.
    pub format_version: u32,
    /// Table name with type suffix.
    pub table_name: String,
    /// Segment name.
    pub segment_name: String,
    /// Number of rows.
    pub total_docs: u64,
    /// Smallest time value in the segment, if the table has a time column.
    #[serde(default)]
    pub start_time: Option<i64>,
    /// Largest time value in the segment, if the table has a time column.
    #[serde(default)]
    pub end_time: Option<i64>,
    /// Column names, sorted.
    pub columns: Vec<String>,
    /// CRC32 over all column files.
    pub crc: u32,
    /// Creation time in milliseconds since the Unix epoch.
    #[serde(default)]
    pub creation_time_ms: u64,
}

/// Returns the path of a column file inside a segment directory.
#[must_use]
pub fn column_path(dir: &Path, column: &str) -> PathBuf {
    dir.join(format!("{column}.{COLUMN_FILE_EXT}"))
}

/// Reads and parses the manifest of a segment directory.
///
/// # Errors
///
/// Returns an error if the directory or manifest is missing, the manifest
/// does not parse, or it was written by a newer format version.
pub fn read_manifest(dir: &Path) -> StorageResult<SegmentManifest> {
    if !dir.exists() {
        return Err(StorageError::NotFound(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(StorageError::NotADirectory(dir.to_path_buf()));
    }

    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Err(StorageError::Corrupted(format!(
            "missing {MANIFEST_FILE} in {}",
            dir.display()
        )));
    }

    let data = fs::read(&manifest_path)?;
    let manifest: SegmentManifest =
        serde_json::from_slice(&data).map_err(|source| StorageError::Manifest {
            path: dir.to_path_buf(),
            source,
        })?;

    if manifest.format_version > FORMAT_VERSION {
        return Err(StorageError::Corrupted(format!(
            "unsupported segment format version {} in {}",
            manifest.format_version,
            dir.display()
        )));
    }

    Ok(manifest)
}

/// Reads every column listed in the manifest into memory.
///
/// # Errors
///
/// Returns an error if a listed column file is missing or unreadable.
pub fn read_columns(
    dir: &Path,
    manifest: &SegmentManifest,
) -> StorageResult<BTreeMap<String, Vec<u8>>> {
    let mut columns = BTreeMap::new();
    for column in &manifest.columns {
        let path = column_path(dir, column);
        if !path.exists() {
            return Err(StorageError::Corrupted(format!(
                "missing column file {}",
                path.display()
            )));
        }
        columns.insert(column.clone(), fs::read(&path)?);
    }
    Ok(columns)
}

/// Computes the checksum of in-memory columns.
///
/// Each name and each data block is prefixed with its length as a
/// little-endian `u64`, so bytes cannot shift between adjacent fields.
#[must_use]
pub fn checksum<'a, I>(columns: I) -> u32
where
    I: IntoIterator<Item = (&'a String, &'a Vec<u8>)>,
{
    let mut hasher = crc32fast::Hasher::new();
    for (name, data) in columns {
        hasher.update(&(name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(&(data.len() as u64).to_le_bytes());
        hasher.update(data);
    }
    hasher.finalize()
}

/// Computes the checksum of the column files of a segment directory.
///
/// # Errors
///
/// Returns an error if a column file is missing or unreadable.
pub fn compute_crc(dir: &Path, manifest: &SegmentManifest) -> StorageResult<u32> {
    let columns = read_columns(dir, manifest)?;
    Ok(checksum(&columns))
}

/// Reads the manifest and checks that the column files match its checksum.
///
/// # Errors
///
/// Returns [`StorageError::ChecksumMismatch`] on a mismatch, or any error
/// from [`read_manifest`] / [`read_columns`].
pub fn verify_segment_dir(dir: &Path) -> StorageResult<SegmentManifest> {
    let manifest = read_manifest(dir)?;
    let actual = compute_crc(dir, &manifest)?;
    if actual != manifest.crc {
        return Err(StorageError::ChecksumMismatch {
            path: dir.to_path_buf(),
            expected: manifest.crc,
            actual,
        });
    }
    Ok(manifest)
}

/// Builds a segment directory on disk.
///
/// This is the minimal writer used by tests, tools, and benchmarks; the
/// real segment producer lives outside this workspace.
#[derive(Debug, Clone)]
pub struct SegmentWriter {
    table_name: String,
    segment_name: String,
    total_docs: u64,
    time_range: Option<(i64, i64)>,
    columns: BTreeMap<String, Vec<u8>>,
}

impl SegmentWriter {
    /// Starts a writer for the given table and segment.
    #[must_use]
    pub fn new(table_name: impl Into<String>, segment_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            segment_name: segment_name.into(),
            total_docs: 0,
            time_range: None,
            columns: BTreeMap::new(),
        }
    }

    /// Sets the row count.
    #[must_use]
    pub const fn total_docs(mut self, total_docs: u64) -> Self {
        self.total_docs = total_docs;
        self
    }

    /// Sets the time range covered by the segment.
    #[must_use]
    pub const fn time_range(mut self, start: i64, end: i64) -> Self {
        self.time_range = Some((start, end));
        self
    }

    /// Adds (or replaces) a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.columns.insert(name.into(), data.into());
        self
    }

    /// Writes the segment into `dir`, creating it if needed.
    ///
    /// Column files are written and synced before the manifest, so a
    /// directory with a valid manifest always has its columns in place.
    ///
    /// # Errors
    ///
    /// Returns an error if a column name is not a plain file name or if any
    /// write fails.
    pub fn write(&self, dir: &Path) -> StorageResult<SegmentManifest> {
        for name in self.columns.keys() {
            if name.is_empty() || name.contains(['/', '\\']) || name == MANIFEST_FILE {
                return Err(StorageError::Corrupted(format!(
                    "invalid column name: {name:?}"
                )));
            }
        }

        fs::create_dir_all(dir)?;

        for (name, data) in &self.columns {
            let mut file = File::create(column_path(dir, name))?;
            file.write_all(data)?;
            file.sync_all()?;
        }

        let manifest = SegmentManifest {
            format_version: FORMAT_VERSION,
            table_name: self.table_name.clone(),
            segment_name: self.segment_name.clone(),
            total_docs: self.total_docs,
            start_time: self.time_range.map(|(start, _)| start),
            end_time: self.time_range.map(|(_, end)| end),
            columns: self.columns.keys().cloned().collect(),
            crc: checksum(&self.columns),
            creation_time_ms: now_millis(),
        };

        let encoded = serde_json::to_vec_pretty(&manifest).map_err(|source| {
            StorageError::Manifest {
                path: dir.to_path_buf(),
                source,
            }
        })?;
        let mut file = File::create(dir.join(MANIFEST_FILE))?;
        file.write_all(&encoded)?;
        file.sync_all()?;

        tracing::debug!(
            segment = %self.segment_name,
            dir = %dir.display(),
            crc = manifest.crc,
            "wrote segment directory"
        );

        Ok(manifest)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
