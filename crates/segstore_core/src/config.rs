//! Instance and table configuration.

use crate::types::TableType;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration of one server instance's segment storage.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Identifier of this server instance, used in logs.
    pub instance_id: String,

    /// Root directory holding one sub-directory per table.
    pub data_dir: PathBuf,

    /// Directory where downloaded segment archives are staged before they
    /// are materialized into the data directory.
    pub segment_tar_dir: PathBuf,

    /// Maximum number of reload/refresh operations running at once.
    pub max_parallel_reloads: usize,

    /// How long a reload may wait for an admission slot (`None` = forever).
    pub reload_admission_timeout: Option<Duration>,

    /// Whether recovery checks the primary directory's checksum before
    /// keeping it over a leftover backup.
    pub verify_on_recovery: bool,

    /// Whether segment loads verify column checksums.
    pub verify_crc_on_load: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            instance_id: "server_0".to_string(),
            data_dir: PathBuf::from("data"),
            segment_tar_dir: PathBuf::from("segment_tar"),
            max_parallel_reloads: 1,
            reload_admission_timeout: None,
            verify_on_recovery: true,
            verify_crc_on_load: true,
        }
    }
}

impl InstanceConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance identifier.
    #[must_use]
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Sets the segment archive staging directory.
    #[must_use]
    pub fn segment_tar_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.segment_tar_dir = dir.into();
        self
    }

    /// Sets the maximum number of concurrent reloads. Values below one are
    /// treated as one.
    #[must_use]
    pub fn max_parallel_reloads(mut self, value: usize) -> Self {
        self.max_parallel_reloads = value.max(1);
        self
    }

    /// Sets the admission wait timeout.
    #[must_use]
    pub const fn reload_admission_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reload_admission_timeout = timeout;
        self
    }

    /// Sets whether recovery verifies checksums.
    #[must_use]
    pub const fn verify_on_recovery(mut self, value: bool) -> Self {
        self.verify_on_recovery = value;
        self
    }

    /// Sets whether loads verify checksums.
    #[must_use]
    pub const fn verify_crc_on_load(mut self, value: bool) -> Self {
        self.verify_crc_on_load = value;
        self
    }
}

/// Per-table configuration supplied by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Table name with type suffix.
    pub table_name: String,
    /// Table type.
    pub table_type: TableType,
    /// Overrides [`InstanceConfig::verify_crc_on_load`] when set.
    pub verify_crc_on_load: Option<bool>,
}

impl TableConfig {
    /// Creates a table config for a table name with type suffix.
    ///
    /// The type is taken from the suffix; names without one are treated as
    /// offline tables.
    #[must_use]
    pub fn new(table_name_with_type: impl Into<String>) -> Self {
        let table_name = table_name_with_type.into();
        let table_type = TableType::from_table_name(&table_name).unwrap_or(TableType::Offline);
        Self {
            table_name,
            table_type,
            verify_crc_on_load: None,
        }
    }

    /// Overrides checksum verification for this table.
    #[must_use]
    pub const fn verify_crc_on_load(mut self, value: bool) -> Self {
        self.verify_crc_on_load = Some(value);
        self
    }
}

/// Settings a segment loader receives for one load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLoadingConfig {
    /// Whether to verify column checksums against the manifest.
    pub verify_crc: bool,
}

impl IndexLoadingConfig {
    /// Derives the loading config from instance and table settings.
    #[must_use]
    pub fn new(instance: &InstanceConfig, table: &TableConfig) -> Self {
        Self {
            verify_crc: table
                .verify_crc_on_load
                .unwrap_or(instance.verify_crc_on_load),
        }
    }
}

impl Default for IndexLoadingConfig {
    fn default() -> Self {
        Self { verify_crc: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = InstanceConfig::default();
        assert_eq!(config.max_parallel_reloads, 1);
        assert!(config.reload_admission_timeout.is_none());
        assert!(config.verify_on_recovery);
        assert!(config.verify_crc_on_load);
    }

    #[test]
    fn builder_pattern() {
        let config = InstanceConfig::new()
            .instance_id("server_7")
            .data_dir("/var/segstore")
            .max_parallel_reloads(0)
            .reload_admission_timeout(Some(Duration::from_secs(5)))
            .verify_on_recovery(false);

        assert_eq!(config.instance_id, "server_7");
        assert_eq!(config.data_dir, PathBuf::from("/var/segstore"));
        assert_eq!(config.max_parallel_reloads, 1);
        assert_eq!(config.reload_admission_timeout, Some(Duration::from_secs(5)));
        assert!(!config.verify_on_recovery);
    }

    #[test]
    fn table_override_wins() {
        let instance = InstanceConfig::new().verify_crc_on_load(true);
        let table = TableConfig::new("events_OFFLINE").verify_crc_on_load(false);

        assert!(!IndexLoadingConfig::new(&instance, &table).verify_crc);
        assert!(IndexLoadingConfig::new(&instance, &TableConfig::new("events_OFFLINE")).verify_crc);
    }

    #[test]
    fn table_type_from_suffix() {
        assert_eq!(
            TableConfig::new("events_REALTIME").table_type,
            TableType::Realtime
        );
    }
}
