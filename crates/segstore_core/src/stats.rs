//! Instance statistics.
//!
//! Counters are atomic and can be read while lifecycle operations and
//! queries are in progress.
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = InstanceDataManager::open(config, catalog)?;
//! manager.reload_segment("events_OFFLINE", "events_0")?;
//!
//! let stats = manager.stats().snapshot();
//! println!("Reloads: {}", stats.reloads_succeeded);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Segment lifecycle counters for one instance.
#[derive(Debug, Default)]
pub struct InstanceStats {
    // Lifecycle counters
    segments_added: AtomicU64,
    segments_removed: AtomicU64,
    segments_disposed: AtomicU64,

    // Reload counters
    reloads_succeeded: AtomicU64,
    reloads_skipped: AtomicU64,
    reloads_failed: AtomicU64,
    recoveries: AtomicU64,
    recovery_failures: AtomicU64,
    admission_waits: AtomicU64,

    // Query-path counters
    acquisitions: AtomicU64,
    releases: AtomicU64,
}

impl InstanceStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_segment_added(&self) {
        self.segments_added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segment_removed(&self) {
        self.segments_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segment_disposed(&self) {
        self.segments_disposed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reload_succeeded(&self) {
        self.reloads_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reload_skipped(&self) {
        self.reloads_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reload_failed(&self) {
        self.reloads_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a recovery that had to repair a segment directory.
    pub(crate) fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovery_failure(&self) {
        self.recovery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_admission_wait(&self) {
        self.admission_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acquisition(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of segments added (including replacements).
    pub fn segments_added(&self) -> u64 {
        self.segments_added.load(Ordering::Relaxed)
    }

    /// Returns the number of segments removed.
    pub fn segments_removed(&self) -> u64 {
        self.segments_removed.load(Ordering::Relaxed)
    }

    /// Returns the number of handles whose in-memory resources were freed.
    pub fn segments_disposed(&self) -> u64 {
        self.segments_disposed.load(Ordering::Relaxed)
    }

    /// Returns the number of successful reloads.
    pub fn reloads_succeeded(&self) -> u64 {
        self.reloads_succeeded.load(Ordering::Relaxed)
    }

    /// Returns the number of reloads skipped as no-ops.
    pub fn reloads_skipped(&self) -> u64 {
        self.reloads_skipped.load(Ordering::Relaxed)
    }

    /// Returns the number of failed reloads.
    pub fn reloads_failed(&self) -> u64 {
        self.reloads_failed.load(Ordering::Relaxed)
    }

    /// Returns the number of segment directories repaired by recovery.
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::Relaxed)
    }

    /// Returns the number of segment directories the startup sweep could
    /// not repair.
    pub fn recovery_failures(&self) -> u64 {
        self.recovery_failures.load(Ordering::Relaxed)
    }

    /// Returns how many reloads had to wait for an admission slot.
    pub fn admission_waits(&self) -> u64 {
        self.admission_waits.load(Ordering::Relaxed)
    }

    /// Returns the number of segment acquisitions.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Returns the number of segment releases.
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            segments_added: self.segments_added(),
            segments_removed: self.segments_removed(),
            segments_disposed: self.segments_disposed(),
            reloads_succeeded: self.reloads_succeeded(),
            reloads_skipped: self.reloads_skipped(),
            reloads_failed: self.reloads_failed(),
            recoveries: self.recoveries(),
            recovery_failures: self.recovery_failures(),
            admission_waits: self.admission_waits(),
            acquisitions: self.acquisitions(),
            releases: self.releases(),
        }
    }
}

/// A point-in-time snapshot of instance statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Segments added.
    pub segments_added: u64,
    /// Segments removed.
    pub segments_removed: u64,
    /// Handles disposed.
    pub segments_disposed: u64,
    /// Successful reloads.
    pub reloads_succeeded: u64,
    /// Skipped reloads.
    pub reloads_skipped: u64,
    /// Failed reloads.
    pub reloads_failed: u64,
    /// Directories repaired by recovery.
    pub recoveries: u64,
    /// Directories the startup sweep could not repair.
    pub recovery_failures: u64,
    /// Reloads that waited for admission.
    pub admission_waits: u64,
    /// Segment acquisitions.
    pub acquisitions: u64,
    /// Segment releases.
    pub releases: u64,
}

impl StatsSnapshot {
    /// Returns the number of currently outstanding acquisitions.
    #[must_use]
    pub const fn live_acquisitions(&self) -> u64 {
        self.acquisitions.saturating_sub(self.releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stats_are_zero() {
        assert_eq!(InstanceStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn counters_increment() {
        let stats = InstanceStats::new();
        stats.record_acquisition();
        stats.record_acquisition();
        stats.record_release();
        stats.record_reload_failed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.acquisitions, 2);
        assert_eq!(snapshot.live_acquisitions(), 1);
        assert_eq!(snapshot.reloads_failed, 1);
    }
}
