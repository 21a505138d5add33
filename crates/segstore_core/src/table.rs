//! Reference-counted segment collection of one table.
//!
//! Each mapped segment carries a reference count that starts at one for
//! the collection itself. Readers add one per acquisition; replacing or
//! removing the segment drops the collection's reference. Whoever takes
//! the count to zero disposes the handle, so a superseded handle lives
//! exactly as long as its last reader.
//!
//! The map lock is only ever held for pointer-level updates.

use crate::error::{CoreError, CoreResult};
use crate::segment::{Segment, SegmentMetadata};
use crate::stats::InstanceStats;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct SegmentEntry {
    segment: Segment,
    refs: AtomicUsize,
}

impl SegmentEntry {
    fn new(segment: Segment) -> Self {
        Self {
            segment,
            refs: AtomicUsize::new(1),
        }
    }

    /// Adds a reference unless the entry is already disposed.
    fn try_acquire(&self) -> bool {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                (refs > 0).then_some(refs + 1)
            })
            .is_ok()
    }

    fn release(&self, shared: &TableShared) {
        match self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1))
        {
            Ok(1) => {
                self.segment.destroy();
                shared.stats.record_segment_disposed();
                tracing::debug!(
                    table = %shared.table_name,
                    segment = %self.segment.name(),
                    "disposed segment"
                );
            }
            Ok(_) => {}
            Err(_) => {
                tracing::error!(
                    table = %shared.table_name,
                    segment = %self.segment.name(),
                    "released segment with no outstanding references"
                );
                debug_assert!(false, "segment reference count underflow");
            }
        }
    }
}

struct TableShared {
    table_name: String,
    stats: Arc<InstanceStats>,
}

/// Segments of one table, keyed by segment name.
pub struct TableSegments {
    shared: Arc<TableShared>,
    segments: RwLock<HashMap<String, Arc<SegmentEntry>>>,
}

impl TableSegments {
    /// Creates an empty collection with its own stats.
    #[must_use]
    pub fn new(table_name: impl Into<String>) -> Self {
        Self::with_stats(table_name, Arc::new(InstanceStats::new()))
    }

    /// Creates an empty collection reporting into shared stats.
    #[must_use]
    pub fn with_stats(table_name: impl Into<String>, stats: Arc<InstanceStats>) -> Self {
        Self {
            shared: Arc::new(TableShared {
                table_name: table_name.into(),
                stats,
            }),
            segments: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the table name with type.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.shared.table_name
    }

    /// Inserts a segment, replacing any segment with the same name.
    ///
    /// Readers holding the replaced handle keep it until they release it.
    pub fn add_segment(&self, segment: impl Into<Segment>) {
        let segment = segment.into();
        let name = segment.name().to_string();
        let entry = Arc::new(SegmentEntry::new(segment));

        let replaced = self.segments.write().insert(name.clone(), entry);
        self.shared.stats.record_segment_added();

        match replaced {
            Some(old) => {
                tracing::info!(table = %self.table_name(), segment = %name, "replaced segment");
                old.release(&self.shared);
            }
            None => {
                tracing::info!(table = %self.table_name(), segment = %name, "added segment");
            }
        }
    }

    /// Removes a segment. Does nothing if it is not mapped.
    ///
    /// Returns true if a segment was removed.
    pub fn remove_segment(&self, segment_name: &str) -> bool {
        let removed = self.segments.write().remove(segment_name);
        match removed {
            Some(old) => {
                self.shared.stats.record_segment_removed();
                tracing::info!(table = %self.table_name(), segment = %segment_name, "removed segment");
                old.release(&self.shared);
                true
            }
            None => false,
        }
    }

    /// Acquires the current handle of a segment.
    #[must_use]
    pub fn acquire_segment(&self, segment_name: &str) -> Option<SegmentRef> {
        let segments = self.segments.read();
        let entry = segments.get(segment_name)?;
        self.acquire_entry(entry)
    }

    /// Acquires every mapped segment as one consistent snapshot.
    #[must_use]
    pub fn acquire_all_segments(&self) -> Vec<SegmentRef> {
        let segments = self.segments.read();
        segments
            .values()
            .filter_map(|entry| self.acquire_entry(entry))
            .collect()
    }

    fn acquire_entry(&self, entry: &Arc<SegmentEntry>) -> Option<SegmentRef> {
        if !entry.try_acquire() {
            return None;
        }
        self.shared.stats.record_acquisition();
        Some(SegmentRef {
            entry: Arc::clone(entry),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Releases a previously acquired handle.
    ///
    /// Dropping a [`SegmentRef`] has the same effect; this form checks that
    /// the handle belongs to this table.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRelease`] if the handle was acquired
    /// from another table. The handle is still released to its own table.
    pub fn release_segment(&self, segment: SegmentRef) -> CoreResult<()> {
        if !Arc::ptr_eq(&segment.shared, &self.shared) {
            return Err(CoreError::InvalidRelease {
                table: self.table_name().to_string(),
                segment: segment.name().to_string(),
                message: format!("handle belongs to table {}", segment.table_name()),
            });
        }
        drop(segment);
        Ok(())
    }

    /// Returns the metadata of one segment.
    #[must_use]
    pub fn segment_metadata(&self, segment_name: &str) -> Option<SegmentMetadata> {
        self.acquire_segment(segment_name).map(|s| s.metadata())
    }

    /// Returns the metadata of every segment, sorted by segment name.
    #[must_use]
    pub fn all_segments_metadata(&self) -> Vec<SegmentMetadata> {
        let mut metadata: Vec<_> = self
            .acquire_all_segments()
            .iter()
            .map(|s| s.metadata())
            .collect();
        metadata.sort_by(|a, b| a.segment_name.cmp(&b.segment_name));
        metadata
    }

    /// Returns the mapped segment names, sorted.
    #[must_use]
    pub fn segment_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.segments.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns true if a segment with this name is mapped.
    #[must_use]
    pub fn contains(&self, segment_name: &str) -> bool {
        self.segments.read().contains_key(segment_name)
    }

    /// Returns the number of mapped segments.
    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.segments.read().len()
    }

    /// Returns true if no segment is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_segments() == 0
    }

    /// Returns the number of live readers of the currently mapped handle.
    #[must_use]
    pub fn reader_count(&self, segment_name: &str) -> Option<usize> {
        self.segments
            .read()
            .get(segment_name)
            .map(|entry| entry.refs.load(Ordering::Acquire).saturating_sub(1))
    }

    /// Removes every segment.
    pub(crate) fn clear(&self) {
        let drained: Vec<_> = self.segments.write().drain().collect();
        for (name, entry) in drained {
            tracing::debug!(table = %self.table_name(), segment = %name, "dropping segment on shutdown");
            entry.release(&self.shared);
        }
    }
}

impl fmt::Debug for TableSegments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSegments")
            .field("table_name", &self.table_name())
            .field("segments", &self.num_segments())
            .finish()
    }
}

/// A scoped acquisition of a segment handle.
///
/// Dereferences to the [`Segment`]. The acquisition is released when the
/// guard is dropped, on every exit path.
pub struct SegmentRef {
    entry: Arc<SegmentEntry>,
    shared: Arc<TableShared>,
}

impl SegmentRef {
    /// Returns the table the handle was acquired from.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.shared.table_name
    }

    /// Returns true if both guards refer to the same handle.
    #[must_use]
    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl Deref for SegmentRef {
    type Target = Segment;

    fn deref(&self) -> &Segment {
        &self.entry.segment
    }
}

impl Drop for SegmentRef {
    fn drop(&mut self) {
        self.shared.stats.record_release();
        self.entry.release(&self.shared);
    }
}

impl fmt::Debug for SegmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentRef")
            .field("table", &self.table_name())
            .field("segment", &self.name())
            .finish()
    }
}
