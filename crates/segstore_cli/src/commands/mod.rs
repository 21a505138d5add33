//! CLI command implementations.

pub mod inspect;
pub mod recover;
pub mod verify;

use segstore_core::recovery::inspect_reload_state;
use segstore_core::ReloadState;
use segstore_storage::{layout, LocalFs, SegmentFs};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// A segment found under a data directory.
#[derive(Debug)]
pub struct SegmentEntry {
    /// Table name with type.
    pub table: String,
    /// Segment name.
    pub segment: String,
    /// Primary index directory.
    pub dir: PathBuf,
    /// On-disk shape of the segment directory.
    pub state: ReloadState,
}

/// Lists every segment under `data_dir`, sorted by table then segment.
///
/// Backup and temp directories are folded into the segment they belong
/// to, so an interrupted reload shows up as one non-stable entry.
pub fn scan_segments(
    data_dir: &Path,
    table_filter: Option<&str>,
) -> Result<Vec<SegmentEntry>, Box<dyn std::error::Error>> {
    if !data_dir.is_dir() {
        return Err(format!("No data directory found at {:?}", data_dir).into());
    }

    let fs = LocalFs::new();
    let mut entries = Vec::new();

    for table in fs.list_dir(data_dir)? {
        if table_filter.is_some_and(|filter| filter != table) {
            continue;
        }
        let table_dir = data_dir.join(&table);
        if !fs.is_dir(&table_dir) {
            continue;
        }

        let segments: BTreeSet<String> = fs
            .list_dir(&table_dir)?
            .into_iter()
            .filter(|name| fs.is_dir(&table_dir.join(name)))
            .map(|name| match layout::primary_name_of(&name) {
                Some(primary) => primary.to_string(),
                None => name,
            })
            .collect();

        for segment in segments {
            let dir = table_dir.join(&segment);
            let state = inspect_reload_state(&fs, &dir);
            entries.push(SegmentEntry {
                table: table.clone(),
                segment,
                dir,
                state,
            });
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use segstore_storage::SegmentWriter;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn scan_folds_reserved_dirs_into_segment() {
        let temp = tempdir().unwrap();
        let table_dir = temp.path().join("events_OFFLINE");
        for name in ["s1", "s2"] {
            SegmentWriter::new("events_OFFLINE", name)
                .total_docs(1)
                .column("c", vec![1u8])
                .write(&table_dir.join(name))
                .unwrap();
        }
        fs::rename(table_dir.join("s2"), layout::backup_dir(&table_dir.join("s2"))).unwrap();
        fs::write(temp.path().join("LOCK"), b"").unwrap();

        let entries = scan_segments(temp.path(), None).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.segment.as_str()).collect();
        assert_eq!(names, vec!["s1", "s2"]);
        assert!(entries[0].state.is_stable());
        assert_eq!(
            entries[1].state,
            ReloadState::InFlight {
                primary_present: false
            }
        );

        assert!(scan_segments(temp.path(), Some("other_OFFLINE"))
            .unwrap()
            .is_empty());
    }
}
