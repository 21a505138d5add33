//! Per-segment mutation locks.
//!
//! Every add, remove, and reload of a segment runs under that segment's
//! lock. Locks for different segments are independent, so mutations of
//! different segments proceed in parallel.
//!
//! A lock entry is created on first request and kept for the lifetime of
//! the registry. Acquiring a lock the current thread already holds is
//! reported as [`CoreError::ReentrantLock`] instead of deadlocking.

use crate::error::{CoreError, CoreResult};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static NEXT_REGISTRY_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static HELD: RefCell<HashSet<(usize, SegmentKey)>> = RefCell::new(HashSet::new());
}

/// Identity of a segment: table name with type plus segment name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentKey {
    /// Table name with type suffix.
    pub table: String,
    /// Segment name.
    pub segment: String,
}

impl SegmentKey {
    /// Creates a key.
    #[must_use]
    pub fn new(table: impl Into<String>, segment: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            segment: segment.into(),
        }
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.segment)
    }
}

/// Registry of per-segment mutual-exclusion locks.
pub struct SegmentLocks {
    id: usize,
    locks: Mutex<HashMap<SegmentKey, Arc<Mutex<()>>>>,
}

impl SegmentLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, key: &SegmentKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    fn check_not_held(&self, key: &SegmentKey) -> CoreResult<()> {
        let held = HELD.with(|held| held.borrow().contains(&(self.id, key.clone())));
        if held {
            return Err(CoreError::ReentrantLock {
                table: key.table.clone(),
                segment: key.segment.clone(),
            });
        }
        Ok(())
    }

    /// Blocks until the segment's lock is free, then takes it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReentrantLock`] if the calling thread already
    /// holds this segment's lock.
    pub fn lock(&self, table: &str, segment: &str) -> CoreResult<SegmentLockGuard> {
        let key = SegmentKey::new(table, segment);
        self.check_not_held(&key)?;

        let guard = self.entry(&key).lock_arc();
        Ok(SegmentLockGuard::new(self.id, key, guard))
    }

    /// Takes the segment's lock if it is free.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReentrantLock`] if the calling thread already
    /// holds this segment's lock.
    pub fn try_lock(&self, table: &str, segment: &str) -> CoreResult<Option<SegmentLockGuard>> {
        let key = SegmentKey::new(table, segment);
        self.check_not_held(&key)?;

        Ok(self
            .entry(&key)
            .try_lock_arc()
            .map(|guard| SegmentLockGuard::new(self.id, key, guard)))
    }

    /// Returns the number of lock entries created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Returns true if no lock has been requested yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SegmentLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SegmentLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentLocks")
            .field("entries", &self.len())
            .finish()
    }
}

/// Proof that the holder owns one segment's lock. Released on drop.
pub struct SegmentLockGuard {
    registry: usize,
    key: SegmentKey,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl SegmentLockGuard {
    fn new(registry: usize, key: SegmentKey, guard: ArcMutexGuard<RawMutex, ()>) -> Self {
        HELD.with(|held| held.borrow_mut().insert((registry, key.clone())));
        Self {
            registry,
            key,
            _guard: guard,
        }
    }

    /// Returns the key this guard locks.
    #[must_use]
    pub fn key(&self) -> &SegmentKey {
        &self.key
    }

    /// Returns true if this guard locks the given segment.
    #[must_use]
    pub fn covers(&self, table: &str, segment: &str) -> bool {
        self.key.table == table && self.key.segment == segment
    }
}

impl Drop for SegmentLockGuard {
    fn drop(&mut self) {
        let key = (self.registry, self.key.clone());
        HELD.with(|held| held.borrow_mut().remove(&key));
    }
}

impl fmt::Debug for SegmentLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentLockGuard")
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reentrant_lock_rejected() {
        let locks = SegmentLocks::new();
        let _guard = locks.lock("t_OFFLINE", "s1").unwrap();

        let result = locks.lock("t_OFFLINE", "s1");
        assert!(matches!(result, Err(CoreError::ReentrantLock { .. })));
    }

    #[test]
    fn lock_reusable_after_drop() {
        let locks = SegmentLocks::new();
        drop(locks.lock("t_OFFLINE", "s1").unwrap());
        let guard = locks.lock("t_OFFLINE", "s1").unwrap();
        assert!(guard.covers("t_OFFLINE", "s1"));
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn different_segments_do_not_block() {
        let locks = SegmentLocks::new();
        let _a = locks.lock("t_OFFLINE", "s1").unwrap();
        let b = locks.try_lock("t_OFFLINE", "s2").unwrap();
        assert!(b.is_some());
    }

    #[test]
    fn separate_registries_are_independent() {
        let first = SegmentLocks::new();
        let second = SegmentLocks::new();
        let _a = first.lock("t_OFFLINE", "s1").unwrap();
        assert!(second.lock("t_OFFLINE", "s1").is_ok());
    }

    #[test]
    fn same_segment_blocks_other_thread() {
        let locks = Arc::new(SegmentLocks::new());
        let guard = locks.lock("t_OFFLINE", "s1").unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let handle = {
            let locks = Arc::clone(&locks);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _g = locks.lock("t_OFFLINE", "s1").unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(guard);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
