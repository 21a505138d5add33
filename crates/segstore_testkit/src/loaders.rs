//! Instrumented segment loaders.

use parking_lot::Mutex;
use segstore_core::{
    CoreError, CoreResult, DirectorySegmentLoader, ImmutableSegment, IndexLoadingConfig, Schema,
    SegmentLoader,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// A [`SegmentLoader`] that records how it is called.
///
/// Wraps [`DirectorySegmentLoader`] and can slow loads down or fail them
/// for chosen segments. Tracks how many loads run at once, overall and per
/// segment, so tests can check which reloads were serialized.
#[derive(Debug, Default)]
pub struct InstrumentedLoader {
    inner: DirectorySegmentLoader,
    delay: Mutex<Duration>,
    failing: Mutex<HashSet<String>>,
    loads: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    per_segment: Mutex<HashMap<String, (usize, usize)>>,
}

impl InstrumentedLoader {
    /// Creates a loader with no delay and no failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every load sleep for `delay` before returning.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Makes loads of `segment` fail.
    pub fn fail_segment(&self, segment: impl Into<String>) {
        self.failing.lock().insert(segment.into());
    }

    /// Lets loads of `segment` succeed again.
    pub fn heal_segment(&self, segment: &str) {
        self.failing.lock().remove(segment);
    }

    /// Returns the number of load calls.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Returns the highest number of loads that ran at once.
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    /// Returns the highest number of loads of one segment that ran at once.
    pub fn peak_active_for(&self, segment: &str) -> usize {
        self.per_segment
            .lock()
            .get(segment)
            .map_or(0, |(_, peak)| *peak)
    }

    fn enter(&self, segment: &str) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);

        let mut per_segment = self.per_segment.lock();
        let (active, peak) = per_segment.entry(segment.to_string()).or_default();
        *active += 1;
        *peak = (*peak).max(*active);
    }

    fn exit(&self, segment: &str) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        if let Some((active, _)) = self.per_segment.lock().get_mut(segment) {
            *active -= 1;
        }
    }
}

impl SegmentLoader for InstrumentedLoader {
    fn load(
        &self,
        table_name: &str,
        segment_name: &str,
        index_dir: &Path,
        config: &IndexLoadingConfig,
        schema: Option<&Schema>,
    ) -> CoreResult<ImmutableSegment> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.enter(segment_name);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let result = if self.failing.lock().contains(segment_name) {
            Err(CoreError::segment_load(
                table_name,
                segment_name,
                "injected load failure",
            ))
        } else {
            self.inner
                .load(table_name, segment_name, index_dir, config, schema)
        };

        self.exit(segment_name);
        result
    }
}
