//! Property-based test generators using proptest.
//!
//! Provides strategies for generating names, column data and sequences of
//! table operations that respect the naming rules.

use proptest::prelude::*;
use segstore_core::{OFFLINE_SUFFIX, REALTIME_SUFFIX};

/// Strategy for generating valid segment names.
pub fn segment_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating raw table names.
pub fn raw_table_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,15}").expect("Invalid regex")
}

/// Strategy for generating table names with a type suffix.
pub fn table_name_strategy() -> impl Strategy<Value = String> {
    (raw_table_name_strategy(), any::<bool>()).prop_map(|(raw, offline)| {
        let suffix = if offline { OFFLINE_SUFFIX } else { REALTIME_SUFFIX };
        format!("{raw}{suffix}")
    })
}

/// Strategy for generating column contents (arbitrary bytes).
pub fn column_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// An operation on a table's segment collection.
#[derive(Debug, Clone)]
pub enum TableOperation {
    /// Add or replace a segment.
    Add {
        /// Segment index into the name pool.
        segment: usize,
    },
    /// Remove a segment.
    Remove {
        /// Segment index into the name pool.
        segment: usize,
    },
    /// Acquire a segment and hold the guard.
    Acquire {
        /// Segment index into the name pool.
        segment: usize,
    },
    /// Drop one held guard.
    Release {
        /// Index into the held guards, modulo their count.
        slot: usize,
    },
}

/// Number of distinct segment names used by [`table_operation_strategy`].
pub const SEGMENT_POOL: usize = 4;

/// Returns the segment name for a pool index.
#[must_use]
pub fn pooled_segment_name(index: usize) -> String {
    format!("seg_{}", index % SEGMENT_POOL)
}

/// Strategy for generating table operations.
pub fn table_operation_strategy() -> impl Strategy<Value = TableOperation> {
    prop_oneof![
        2 => (0..SEGMENT_POOL).prop_map(|segment| TableOperation::Add { segment }),
        1 => (0..SEGMENT_POOL).prop_map(|segment| TableOperation::Remove { segment }),
        3 => (0..SEGMENT_POOL).prop_map(|segment| TableOperation::Acquire { segment }),
        2 => any::<usize>().prop_map(|slot| TableOperation::Release { slot }),
    ]
}

/// Strategy for generating a sequence of table operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<TableOperation>> {
    prop::collection::vec(table_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
