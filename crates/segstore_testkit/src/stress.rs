//! Stress tests for segment serving and reload.
//!
//! These helpers hammer an instance from several threads and count every
//! observation that breaks a serving guarantee as a failed operation.

use crate::fixtures::TEST_COLUMN;
use segstore_core::{InstanceDataManager, ReloadOutcome};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of reloads to perform.
    pub reloads: usize,
    /// Number of reader threads.
    pub threads: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            reloads: 20,
            threads: 4,
        }
    }
}

/// Checks that a served handle is intact and carries the expected rows.
fn observe(manager: &InstanceDataManager, table: &str, segment: &str, docs: u64) -> bool {
    let Some(handle) = manager.acquire_segment(table, segment) else {
        return false;
    };
    let expected: Vec<u8> = (0..docs).map(|i| (i % 251) as u8).collect();

    !handle.is_destroyed()
        && handle.total_docs() == docs
        && handle
            .as_immutable()
            .and_then(|s| s.column(TEST_COLUMN))
            .is_some_and(|column| column == expected.as_slice())
}

/// Reloads one segment repeatedly while readers acquire it.
///
/// The segment must have been added from a sample segment with `docs`
/// rows. Every reader observation counts as one operation; an observation
/// fails if the segment is missing or the handle is disposed or torn. A
/// reload that does not return [`ReloadOutcome::Reloaded`] also fails.
pub fn stress_acquire_during_reload(
    manager: &InstanceDataManager,
    table: &str,
    segment: &str,
    docs: u64,
    config: &StressConfig,
) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let done = AtomicBool::new(false);

    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..config.threads {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    if observe(manager, table, segment, docs) {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }

        for _ in 0..config.reloads {
            match manager.reload_segment(table, segment) {
                Ok(ReloadOutcome::Reloaded { .. }) => {
                    successful.fetch_add(1, Ordering::Relaxed);
                }
                _ => {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        done.store(true, Ordering::Release);
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Reloads several segments from parallel threads.
///
/// Each thread reloads every segment in `segments`, `config.reloads` times.
/// Reloads that fail or are skipped count as failed operations.
pub fn stress_parallel_reloads(
    manager: &InstanceDataManager,
    table: &str,
    segments: &[String],
    config: &StressConfig,
) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    let start = Instant::now();

    thread::scope(|scope| {
        for t in 0..config.threads {
            let successful = &successful;
            let failed = &failed;
            scope.spawn(move || {
                for i in 0..config.reloads {
                    let segment = &segments[(t + i) % segments.len()];
                    match manager.reload_segment(table, segment) {
                        Ok(ReloadOutcome::Reloaded { .. }) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
