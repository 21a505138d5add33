//! Test fixtures and instance helpers.
//!
//! Provides convenience functions for setting up a temporary instance with
//! registered tables and for writing segment directories into it.

use segstore_core::{
    DirectorySegmentLoader, InMemoryCatalog, InstanceConfig, InstanceDataManager, Schema,
    SegmentLoader, TableConfig,
};
use segstore_storage::{LocalFs, SegmentFs, SegmentManifest, SegmentWriter};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Offline table registered by every [`TestInstance`].
pub const OFFLINE_TABLE: &str = "events_OFFLINE";

/// Realtime table registered by every [`TestInstance`].
pub const REALTIME_TABLE: &str = "clicks_REALTIME";

/// Column every test schema requires.
pub const TEST_COLUMN: &str = "value";

/// Builds the segment writer used across tests.
///
/// Column bytes are derived from `docs` so different row counts produce
/// different content.
#[must_use]
pub fn sample_segment(table: &str, segment: &str, docs: u64) -> SegmentWriter {
    let value: Vec<u8> = (0..docs).map(|i| (i % 251) as u8).collect();
    SegmentWriter::new(table, segment)
        .total_docs(docs)
        .time_range(0, docs as i64)
        .column(TEST_COLUMN, value)
        .column("tag", segment.as_bytes().to_vec())
}

/// Reads every file under `dir` into a map keyed by relative path.
///
/// Two snapshots compare equal when the directories are byte-identical.
pub fn snapshot_dir(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        let entries = fs::read_dir(dir).expect("Failed to read directory");
        for entry in entries {
            let path = entry.expect("Failed to read entry").path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path
                    .strip_prefix(root)
                    .expect("Entry outside root")
                    .to_path_buf();
                out.insert(relative, fs::read(&path).expect("Failed to read file"));
            }
        }
    }

    let mut out = BTreeMap::new();
    walk(dir, dir, &mut out);
    out
}

/// A temporary instance with automatic cleanup.
pub struct TestInstance {
    /// The instance under test.
    pub manager: InstanceDataManager,
    /// The catalog the instance reads table definitions from.
    pub catalog: Arc<InMemoryCatalog>,
    /// The configuration the instance was opened with.
    pub config: InstanceConfig,
    _temp_dir: TempDir,
}

impl TestInstance {
    /// Opens an instance with default settings.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Opens an instance after adjusting the default config.
    pub fn with_config(f: impl FnOnce(InstanceConfig) -> InstanceConfig) -> Self {
        Self::with_components(
            f,
            Arc::new(DirectorySegmentLoader::new()),
            Arc::new(LocalFs::new()),
        )
    }

    /// Opens an instance with an explicit loader and filesystem.
    pub fn with_components(
        f: impl FnOnce(InstanceConfig) -> InstanceConfig,
        loader: Arc<dyn SegmentLoader>,
        fs: Arc<dyn SegmentFs>,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = f(InstanceConfig::new()
            .instance_id("test_server")
            .data_dir(temp_dir.path().join("data"))
            .segment_tar_dir(temp_dir.path().join("segment_tar")));

        let catalog = Arc::new(InMemoryCatalog::new());
        for table in [OFFLINE_TABLE, REALTIME_TABLE] {
            catalog.put_table_config(TableConfig::new(table));
            catalog.put_schema(
                table,
                Schema::new(segstore_core::raw_table_name(table)).column(TEST_COLUMN),
            );
        }

        let manager =
            InstanceDataManager::open_with(config.clone(), catalog.clone(), loader, fs)
                .expect("Failed to open instance");

        Self {
            manager,
            catalog,
            config,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the root of the temporary directory.
    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Returns the primary directory of a segment in the data directory.
    pub fn segment_dir(&self, table: &str, segment: &str) -> PathBuf {
        self.config.data_dir.join(table).join(segment)
    }

    /// Writes a sample segment into the data directory.
    pub fn write_segment(&self, table: &str, segment: &str, docs: u64) -> SegmentManifest {
        sample_segment(table, segment, docs)
            .write(&self.segment_dir(table, segment))
            .expect("Failed to write segment")
    }

    /// Writes a sample segment and adds it to the offline table.
    pub fn add_offline(&self, segment: &str, docs: u64) -> PathBuf {
        self.write_segment(OFFLINE_TABLE, segment, docs);
        let dir = self.segment_dir(OFFLINE_TABLE, segment);
        self.manager
            .add_offline_segment(OFFLINE_TABLE, segment, &dir)
            .expect("Failed to add segment");
        dir
    }

    /// Drops the instance (releasing its data directory lock) and opens a
    /// new one over the same directories with a local filesystem.
    pub fn reopen(self) -> Self {
        let Self {
            manager,
            catalog,
            config,
            _temp_dir,
        } = self;
        drop(manager);

        let manager = InstanceDataManager::open(config.clone(), catalog.clone())
            .expect("Failed to reopen instance");
        Self {
            manager,
            catalog,
            config,
            _temp_dir,
        }
    }
}

impl Default for TestInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestInstance {
    type Target = InstanceDataManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

/// Runs a test with a temporary instance.
///
/// # Example
///
/// ```rust,ignore
/// use segstore_testkit::with_temp_instance;
///
/// with_temp_instance(|instance| {
///     instance.add_offline("events_0", 10);
///     assert!(instance.get_segment_metadata("events_OFFLINE", "events_0").is_some());
/// });
/// ```
pub fn with_temp_instance<F, R>(f: F) -> R
where
    F: FnOnce(&TestInstance) -> R,
{
    let instance = TestInstance::new();
    f(&instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use segstore_core::TableCatalog;

    #[test]
    fn test_instance_registers_tables() {
        let instance = TestInstance::new();
        assert!(instance.catalog.table_config(OFFLINE_TABLE).is_some());
        assert!(instance.catalog.schema(REALTIME_TABLE).is_some());
    }

    #[test]
    fn test_add_offline() {
        with_temp_instance(|instance| {
            instance.add_offline("events_0", 10);
            let metadata = instance
                .get_segment_metadata(OFFLINE_TABLE, "events_0")
                .unwrap();
            assert_eq!(metadata.total_docs, 10);
        });
    }

    #[test]
    fn test_snapshot_detects_change() {
        let instance = TestInstance::new();
        instance.write_segment(OFFLINE_TABLE, "s1", 4);
        let dir = instance.segment_dir(OFFLINE_TABLE, "s1");

        let before = snapshot_dir(&dir);
        assert_eq!(before, snapshot_dir(&dir));

        fs::write(dir.join("extra"), b"x").unwrap();
        assert_ne!(before, snapshot_dir(&dir));
    }

    #[test]
    fn test_reopen_keeps_data() {
        let instance = TestInstance::new();
        instance.write_segment(OFFLINE_TABLE, "s1", 4);
        let instance = instance.reopen();
        assert!(instance.segment_dir(OFFLINE_TABLE, "s1").is_dir());
    }
}
