//! Segment directory naming.
//!
//! Every segment lives in a directory named after the segment, inside the
//! directory of the table that owns it:
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK                              # Advisory lock for the owning process
//! └─ <table_name_with_type>/
//!    ├─ <segment>/                     # Primary (served) directory
//!    ├─ <segment>.segment.bak/         # Present only while a reload is in flight
//!    └─ <segment>.segment.tmp/         # Present only while a reload is finalizing
//! ```
//!
//! The two suffixes are reserved. The presence or absence of the suffixed
//! directories is the only record of reload progress, so no segment may be
//! named with either suffix.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Suffix of the directory holding the pre-reload copy of a segment.
pub const BACKUP_DIR_SUFFIX: &str = ".segment.bak";

/// Suffix of the directory holding a backup that is waiting to be deleted.
pub const TEMP_DIR_SUFFIX: &str = ".segment.tmp";

/// Returns the backup directory path for a segment index directory.
#[must_use]
pub fn backup_dir(index_dir: &Path) -> PathBuf {
    with_suffix(index_dir, BACKUP_DIR_SUFFIX)
}

/// Returns the temporary directory path for a segment index directory.
#[must_use]
pub fn temp_dir(index_dir: &Path) -> PathBuf {
    with_suffix(index_dir, TEMP_DIR_SUFFIX)
}

fn with_suffix(index_dir: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = index_dir
        .file_name()
        .map(ToOwned::to_owned)
        .unwrap_or_default();
    name.push(suffix);
    index_dir.with_file_name(name)
}

/// Returns true if `name` ends with one of the reserved suffixes.
#[must_use]
pub fn is_reserved_name(name: &str) -> bool {
    name.ends_with(BACKUP_DIR_SUFFIX) || name.ends_with(TEMP_DIR_SUFFIX)
}

/// Maps a reserved directory name back to the segment name it belongs to.
///
/// Returns `None` for names that carry no reserved suffix.
#[must_use]
pub fn primary_name_of(name: &str) -> Option<&str> {
    name.strip_suffix(BACKUP_DIR_SUFFIX)
        .or_else(|| name.strip_suffix(TEMP_DIR_SUFFIX))
        .filter(|primary| !primary.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixed_paths_share_parent() {
        let index_dir = Path::new("/data/events_OFFLINE/events_0");

        assert_eq!(
            backup_dir(index_dir),
            Path::new("/data/events_OFFLINE/events_0.segment.bak")
        );
        assert_eq!(
            temp_dir(index_dir),
            Path::new("/data/events_OFFLINE/events_0.segment.tmp")
        );
    }

    #[test]
    fn reserved_names_detected() {
        assert!(is_reserved_name("seg.segment.bak"));
        assert!(is_reserved_name("seg.segment.tmp"));
        assert!(!is_reserved_name("seg"));
        assert!(!is_reserved_name("seg.segment"));
    }

    #[test]
    fn primary_name_recovered() {
        assert_eq!(primary_name_of("seg_1.segment.bak"), Some("seg_1"));
        assert_eq!(primary_name_of("seg_1.segment.tmp"), Some("seg_1"));
        assert_eq!(primary_name_of("seg_1"), None);
        assert_eq!(primary_name_of(".segment.bak"), None);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn reserved_dirs_map_back_to_primary(name in "[a-z][a-z0-9_]{0,20}") {
                let index_dir = Path::new("/data/t_OFFLINE").join(&name);
                for reserved in [backup_dir(&index_dir), temp_dir(&index_dir)] {
                    let file_name = reserved.file_name().unwrap().to_str().unwrap();
                    prop_assert!(is_reserved_name(file_name));
                    prop_assert_eq!(primary_name_of(file_name), Some(name.as_str()));
                }
                prop_assert!(!is_reserved_name(&name));
            }
        }
    }
}
