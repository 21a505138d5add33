//! Loading segments from their on-disk directories.

use super::handle::{ImmutableSegment, SegmentMetadata};
use crate::catalog::Schema;
use crate::config::IndexLoadingConfig;
use crate::error::{CoreError, CoreResult};
use segstore_storage::format;
use std::path::Path;

/// Builds an [`ImmutableSegment`] from a segment directory.
///
/// Loaders must not modify the directory they read from.
pub trait SegmentLoader: Send + Sync {
    /// Loads the segment stored in `index_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentLoad`] if the directory does not hold a
    /// usable segment for `schema`.
    fn load(
        &self,
        table_name: &str,
        segment_name: &str,
        index_dir: &Path,
        config: &IndexLoadingConfig,
        schema: Option<&Schema>,
    ) -> CoreResult<ImmutableSegment>;
}

/// Loads segments written in the `segstore_storage` directory format.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectorySegmentLoader;

impl DirectorySegmentLoader {
    /// Creates a new loader.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SegmentLoader for DirectorySegmentLoader {
    fn load(
        &self,
        table_name: &str,
        segment_name: &str,
        index_dir: &Path,
        config: &IndexLoadingConfig,
        schema: Option<&Schema>,
    ) -> CoreResult<ImmutableSegment> {
        let fail = |message: String| CoreError::segment_load(table_name, segment_name, message);

        let manifest = format::read_manifest(index_dir).map_err(|e| fail(e.to_string()))?;
        if manifest.segment_name != segment_name {
            return Err(fail(format!(
                "directory holds segment {}",
                manifest.segment_name
            )));
        }

        let columns = format::read_columns(index_dir, &manifest).map_err(|e| fail(e.to_string()))?;

        if config.verify_crc {
            let actual = format::checksum(&columns);
            if actual != manifest.crc {
                return Err(fail(format!(
                    "checksum mismatch: expected {:08x}, got {actual:08x}",
                    manifest.crc
                )));
            }
        }

        if let Some(schema) = schema {
            let missing = schema.missing_columns(columns.keys().map(String::as_str));
            if !missing.is_empty() {
                return Err(fail(format!(
                    "missing schema columns: {}",
                    missing.join(", ")
                )));
            }
        }

        tracing::debug!(
            table = %table_name,
            segment = %segment_name,
            docs = manifest.total_docs,
            "loaded segment"
        );

        Ok(ImmutableSegment::new(
            SegmentMetadata {
                table_name: table_name.to_string(),
                segment_name: segment_name.to_string(),
                total_docs: manifest.total_docs,
                start_time: manifest.start_time,
                end_time: manifest.end_time,
                crc: Some(manifest.crc),
                index_dir: Some(index_dir.to_path_buf()),
                columns: Vec::new(),
                consuming: false,
            },
            columns,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segstore_storage::SegmentWriter;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &Path) {
        SegmentWriter::new("events_OFFLINE", "events_0")
            .total_docs(2)
            .time_range(10, 20)
            .column("user_id", vec![1u8, 2])
            .write(dir)
            .unwrap();
    }

    #[test]
    fn loads_written_segment() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("events_0");
        write(&dir);

        let schema = Schema::new("events").column("user_id");
        let segment = DirectorySegmentLoader
            .load(
                "events_OFFLINE",
                "events_0",
                &dir,
                &IndexLoadingConfig::default(),
                Some(&schema),
            )
            .unwrap();

        assert_eq!(segment.metadata().total_docs, 2);
        assert_eq!(segment.metadata().start_time, Some(10));
        assert_eq!(segment.index_dir(), Some(dir.as_path()));
        assert_eq!(segment.column("user_id"), Some(&[1u8, 2][..]));
    }

    #[test]
    fn checksum_verified_when_enabled() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("events_0");
        write(&dir);
        fs::write(format::column_path(&dir, "user_id"), [7u8, 7]).unwrap();

        let strict = DirectorySegmentLoader.load(
            "events_OFFLINE",
            "events_0",
            &dir,
            &IndexLoadingConfig { verify_crc: true },
            None,
        );
        assert!(matches!(strict, Err(CoreError::SegmentLoad { .. })));

        let lenient = DirectorySegmentLoader.load(
            "events_OFFLINE",
            "events_0",
            &dir,
            &IndexLoadingConfig { verify_crc: false },
            None,
        );
        assert!(lenient.is_ok());
    }

    #[test]
    fn schema_columns_required() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("events_0");
        write(&dir);

        let schema = Schema::new("events").column("user_id").column("country");
        let err = DirectorySegmentLoader
            .load(
                "events_OFFLINE",
                "events_0",
                &dir,
                &IndexLoadingConfig::default(),
                Some(&schema),
            )
            .unwrap_err();
        assert!(err.to_string().contains("country"));
    }

    #[test]
    fn wrong_segment_name_rejected() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("events_0");
        write(&dir);

        let result = DirectorySegmentLoader.load(
            "events_OFFLINE",
            "events_1",
            &dir,
            &IndexLoadingConfig::default(),
            None,
        );
        assert!(result.is_err());
    }
}
