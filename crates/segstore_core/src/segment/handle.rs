//! Loaded segment handles.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Descriptive metadata of a loaded segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentMetadata {
    /// Table name with type suffix.
    pub table_name: String,
    /// Segment name.
    pub segment_name: String,
    /// Number of rows.
    pub total_docs: u64,
    /// Smallest time value, if known.
    pub start_time: Option<i64>,
    /// Largest time value, if known.
    pub end_time: Option<i64>,
    /// Checksum of the persisted data. Absent for in-memory segments.
    pub crc: Option<u32>,
    /// On-disk directory the segment was loaded from. Absent for
    /// in-memory segments.
    pub index_dir: Option<PathBuf>,
    /// Column names, sorted.
    pub columns: Vec<String>,
    /// Whether the segment is still consuming from a stream.
    pub consuming: bool,
}

/// A segment whose data is fixed once loaded.
#[derive(Debug)]
pub struct ImmutableSegment {
    metadata: SegmentMetadata,
    columns: BTreeMap<String, Vec<u8>>,
    destroyed: AtomicBool,
}

impl ImmutableSegment {
    /// Wraps loaded column data.
    #[must_use]
    pub fn new(mut metadata: SegmentMetadata, columns: BTreeMap<String, Vec<u8>>) -> Self {
        metadata.columns = columns.keys().cloned().collect();
        metadata.consuming = false;
        Self {
            metadata,
            columns,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Returns the segment metadata.
    #[must_use]
    pub fn metadata(&self) -> &SegmentMetadata {
        &self.metadata
    }

    /// Returns the bytes of a column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[u8]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Returns the directory this segment was loaded from.
    #[must_use]
    pub fn index_dir(&self) -> Option<&Path> {
        self.metadata.index_dir.as_deref()
    }

    /// Total bytes of column data held in memory.
    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        self.columns.values().map(|c| c.len() as u64).sum()
    }
}

/// A segment still receiving rows from a stream.
///
/// Consuming segments live in memory only and are never reloaded.
#[derive(Debug)]
pub struct ConsumingSegment {
    table_name: String,
    segment_name: String,
    rows: Mutex<Vec<Vec<u8>>>,
    destroyed: AtomicBool,
}

impl ConsumingSegment {
    /// Creates an empty consuming segment.
    #[must_use]
    pub fn new(table_name: impl Into<String>, segment_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            segment_name: segment_name.into(),
            rows: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Appends one encoded row.
    pub fn index(&self, row: impl Into<Vec<u8>>) {
        self.rows.lock().push(row.into());
    }

    /// Returns the number of rows indexed so far.
    #[must_use]
    pub fn num_docs(&self) -> u64 {
        self.rows.lock().len() as u64
    }

    fn metadata(&self) -> SegmentMetadata {
        SegmentMetadata {
            table_name: self.table_name.clone(),
            segment_name: self.segment_name.clone(),
            total_docs: self.num_docs(),
            start_time: None,
            end_time: None,
            crc: None,
            index_dir: None,
            columns: Vec::new(),
            consuming: true,
        }
    }
}

/// A loaded segment of either kind.
#[derive(Debug)]
pub enum Segment {
    /// Persisted, reloadable segment.
    Immutable(ImmutableSegment),
    /// In-memory streaming segment. Reload is a no-op.
    Consuming(ConsumingSegment),
}

impl Segment {
    /// Returns the segment name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Immutable(s) => &s.metadata.segment_name,
            Self::Consuming(s) => &s.segment_name,
        }
    }

    /// Returns a copy of the segment metadata.
    #[must_use]
    pub fn metadata(&self) -> SegmentMetadata {
        match self {
            Self::Immutable(s) => s.metadata.clone(),
            Self::Consuming(s) => s.metadata(),
        }
    }

    /// Returns the row count.
    #[must_use]
    pub fn total_docs(&self) -> u64 {
        match self {
            Self::Immutable(s) => s.metadata.total_docs,
            Self::Consuming(s) => s.num_docs(),
        }
    }

    /// Returns the on-disk directory, if the segment is persisted.
    #[must_use]
    pub fn index_dir(&self) -> Option<&Path> {
        match self {
            Self::Immutable(s) => s.index_dir(),
            Self::Consuming(_) => None,
        }
    }

    /// Returns true for consuming segments.
    #[must_use]
    pub const fn is_consuming(&self) -> bool {
        matches!(self, Self::Consuming(_))
    }

    /// Returns the immutable segment, if this is one.
    #[must_use]
    pub const fn as_immutable(&self) -> Option<&ImmutableSegment> {
        match self {
            Self::Immutable(s) => Some(s),
            Self::Consuming(_) => None,
        }
    }

    /// Returns the consuming segment, if this is one.
    #[must_use]
    pub const fn as_consuming(&self) -> Option<&ConsumingSegment> {
        match self {
            Self::Consuming(s) => Some(s),
            Self::Immutable(_) => None,
        }
    }

    /// Releases in-memory resources. Files on disk are never touched.
    pub(crate) fn destroy(&self) {
        let flag = match self {
            Self::Immutable(s) => &s.destroyed,
            Self::Consuming(s) => &s.destroyed,
        };
        flag.store(true, Ordering::Release);
    }

    /// Returns true once the segment has been disposed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        match self {
            Self::Immutable(s) => s.destroyed.load(Ordering::Acquire),
            Self::Consuming(s) => s.destroyed.load(Ordering::Acquire),
        }
    }
}

impl From<ImmutableSegment> for Segment {
    fn from(segment: ImmutableSegment) -> Self {
        Self::Immutable(segment)
    }
}

impl From<ConsumingSegment> for Segment {
    fn from(segment: ConsumingSegment) -> Self {
        Self::Consuming(segment)
    }
}
