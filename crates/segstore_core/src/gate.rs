//! Bounded admission for reload and refresh operations.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Limits how many reload/refresh operations run at once.
///
/// Callers over the limit block until a slot frees or their timeout
/// expires. The gate is acquired before any segment lock, so a waiting
/// caller never holds one.
#[derive(Debug)]
pub struct ReloadGate {
    capacity: usize,
    in_use: Mutex<usize>,
    freed: Condvar,
}

impl ReloadGate {
    /// Creates a gate with `capacity` slots (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_use: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    /// Waits for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AdmissionTimeout`] if `timeout` elapses first.
    pub fn acquire(&self, timeout: Option<Duration>) -> CoreResult<ReloadPermit<'_>> {
        let start = Instant::now();
        let deadline = timeout.map(|t| start + t);
        let mut in_use = self.in_use.lock();
        let mut waited = false;

        while *in_use >= self.capacity {
            waited = true;
            match deadline {
                Some(deadline) => {
                    if self.freed.wait_until(&mut in_use, deadline).timed_out()
                        && *in_use >= self.capacity
                    {
                        return Err(CoreError::AdmissionTimeout {
                            waited: start.elapsed(),
                        });
                    }
                }
                None => self.freed.wait(&mut in_use),
            }
        }

        *in_use += 1;
        Ok(ReloadPermit {
            gate: self,
            waited: waited.then(|| start.elapsed()),
        })
    }

    /// Takes a slot only if one is free right now.
    #[must_use]
    pub fn try_acquire(&self) -> Option<ReloadPermit<'_>> {
        let mut in_use = self.in_use.lock();
        if *in_use >= self.capacity {
            return None;
        }
        *in_use += 1;
        Some(ReloadPermit {
            gate: self,
            waited: None,
        })
    }

    /// Returns the number of slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of slots currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        *self.in_use.lock()
    }

    fn release(&self) {
        let mut in_use = self.in_use.lock();
        *in_use = in_use.saturating_sub(1);
        drop(in_use);
        self.freed.notify_one();
    }
}

/// A held admission slot. Released on drop.
#[derive(Debug)]
pub struct ReloadPermit<'a> {
    gate: &'a ReloadGate,
    waited: Option<Duration>,
}

impl ReloadPermit<'_> {
    /// Returns how long the caller blocked, if it had to wait at all.
    #[must_use]
    pub const fn waited(&self) -> Option<Duration> {
        self.waited
    }
}

impl Drop for ReloadPermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
