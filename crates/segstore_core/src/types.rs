//! Core type definitions for segstore.

use crate::error::{CoreError, CoreResult};
use segstore_storage::layout;
use serde::Serialize;
use std::fmt;

/// Suffix of offline (bulk-loaded) table names.
pub const OFFLINE_SUFFIX: &str = "_OFFLINE";

/// Suffix of realtime (stream-appended) table names.
pub const REALTIME_SUFFIX: &str = "_REALTIME";

/// Maximum length of a segment or table name.
const MAX_NAME_LEN: usize = 255;

/// How a table's segments are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TableType {
    /// Segments are built elsewhere and assigned as complete directories.
    Offline,
    /// Segments are appended in memory from a stream, then persisted.
    Realtime,
}

impl TableType {
    /// Returns the table-name suffix for this type.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Offline => OFFLINE_SUFFIX,
            Self::Realtime => REALTIME_SUFFIX,
        }
    }

    /// Extracts the type from a table name with type suffix.
    #[must_use]
    pub fn from_table_name(table_name_with_type: &str) -> Option<Self> {
        if table_name_with_type.ends_with(OFFLINE_SUFFIX) {
            Some(Self::Offline)
        } else if table_name_with_type.ends_with(REALTIME_SUFFIX) {
            Some(Self::Realtime)
        } else {
            None
        }
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => write!(f, "OFFLINE"),
            Self::Realtime => write!(f, "REALTIME"),
        }
    }
}

/// Builds a table name with type suffix from a raw table name.
#[must_use]
pub fn table_name_with_type(raw_table_name: &str, table_type: TableType) -> String {
    format!("{raw_table_name}{}", table_type.suffix())
}

/// Strips the type suffix from a table name, if present.
#[must_use]
pub fn raw_table_name(table_name_with_type: &str) -> &str {
    table_name_with_type
        .strip_suffix(OFFLINE_SUFFIX)
        .or_else(|| table_name_with_type.strip_suffix(REALTIME_SUFFIX))
        .unwrap_or(table_name_with_type)
}

fn check_path_component(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(format!("name must be 1-{MAX_NAME_LEN} bytes"));
    }
    if name == "." || name == ".." {
        return Err("name must not be a relative path component".to_string());
    }
    if name.contains(['/', '\\', '\0']) {
        return Err("name must not contain path separators".to_string());
    }
    Ok(())
}

/// Validates a table name with type and returns its type.
///
/// # Errors
///
/// Returns [`CoreError::InvalidTableName`] if the name is empty, is not a
/// single path component, or has no `_OFFLINE` / `_REALTIME` suffix.
pub fn validate_table_name(table_name_with_type: &str) -> CoreResult<TableType> {
    check_path_component(table_name_with_type)
        .map_err(|reason| CoreError::invalid_table_name(table_name_with_type, reason))?;

    let table_type = TableType::from_table_name(table_name_with_type).ok_or_else(|| {
        CoreError::invalid_table_name(
            table_name_with_type,
            format!("missing {OFFLINE_SUFFIX} or {REALTIME_SUFFIX} suffix"),
        )
    })?;

    if raw_table_name(table_name_with_type).is_empty() {
        return Err(CoreError::invalid_table_name(
            table_name_with_type,
            "raw table name is empty",
        ));
    }

    Ok(table_type)
}

/// Validates a segment name.
///
/// # Errors
///
/// Returns [`CoreError::InvalidSegmentName`] if the name is empty, is not a
/// single path component, or ends with a reserved reload suffix.
pub fn validate_segment_name(segment_name: &str) -> CoreResult<()> {
    check_path_component(segment_name)
        .map_err(|reason| CoreError::invalid_segment_name(segment_name, reason))?;

    if layout::is_reserved_name(segment_name) {
        return Err(CoreError::invalid_segment_name(
            segment_name,
            format!(
                "names ending in {} or {} are reserved",
                layout::BACKUP_DIR_SUFFIX,
                layout::TEMP_DIR_SUFFIX
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_type_from_name() {
        assert_eq!(
            TableType::from_table_name("events_OFFLINE"),
            Some(TableType::Offline)
        );
        assert_eq!(
            TableType::from_table_name("events_REALTIME"),
            Some(TableType::Realtime)
        );
        assert_eq!(TableType::from_table_name("events"), None);
    }

    #[test]
    fn name_with_type_round_trip() {
        let name = table_name_with_type("events", TableType::Realtime);
        assert_eq!(name, "events_REALTIME");
        assert_eq!(raw_table_name(&name), "events");
        assert_eq!(raw_table_name("plain"), "plain");
    }

    #[test]
    fn table_names_validated() {
        assert_eq!(
            validate_table_name("events_OFFLINE").unwrap(),
            TableType::Offline
        );
        assert!(validate_table_name("events").is_err());
        assert!(validate_table_name("_OFFLINE").is_err());
        assert!(validate_table_name("a/b_OFFLINE").is_err());
        assert!(validate_table_name("").is_err());
    }

    #[test]
    fn segment_names_validated() {
        validate_segment_name("events_2024_01_01_0").unwrap();
        assert!(validate_segment_name("").is_err());
        assert!(validate_segment_name("..").is_err());
        assert!(validate_segment_name("a/b").is_err());
        assert!(validate_segment_name("seg.segment.bak").is_err());
        assert!(validate_segment_name("seg.segment.tmp").is_err());
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn separators_always_rejected(prefix in "[a-z0-9]{0,8}", suffix in "[a-z0-9]{0,8}") {
                let name = format!("{prefix}/{suffix}");
                prop_assert!(validate_segment_name(&name).is_err());
                let table = format!("{name}_OFFLINE");
                prop_assert!(validate_table_name(&table).is_err());
            }

            #[test]
            fn typed_names_round_trip(raw in "[a-z][a-z0-9]{0,12}", offline in any::<bool>()) {
                let table_type = if offline { TableType::Offline } else { TableType::Realtime };
                let name = table_name_with_type(&raw, table_type);
                prop_assert_eq!(validate_table_name(&name).unwrap(), table_type);
                prop_assert_eq!(raw_table_name(&name), raw.as_str());
            }
        }
    }
}
