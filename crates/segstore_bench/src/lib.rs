//! Benchmark utilities.

use segstore_core::{DirectorySegmentLoader, IndexLoadingConfig, SegmentLoader, TableSegments};
use segstore_testkit::{sample_segment, OFFLINE_TABLE};
use std::path::Path;

/// Builds a table holding `count` immutable segments of `docs` rows each.
///
/// Segment directories are written under `root` and named `seg_<i>`.
pub fn populated_table(root: &Path, count: usize, docs: u64) -> TableSegments {
    let table = TableSegments::new(OFFLINE_TABLE);
    let config = IndexLoadingConfig::default();

    for i in 0..count {
        let name = segment_name(i);
        let dir = root.join(&name);
        sample_segment(OFFLINE_TABLE, &name, docs)
            .write(&dir)
            .expect("Failed to write segment");
        let segment = DirectorySegmentLoader::new()
            .load(OFFLINE_TABLE, &name, &dir, &config, None)
            .expect("Failed to load segment");
        table.add_segment(segment);
    }
    table
}

/// Returns the name of the `i`th benchmark segment.
pub fn segment_name(i: usize) -> String {
    format!("seg_{i}")
}
