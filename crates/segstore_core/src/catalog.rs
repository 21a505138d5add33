//! Table configuration and schema lookup.
//!
//! The instance registry never owns table definitions; it asks a
//! [`TableCatalog`] for them on every lifecycle operation so that config
//! changes are picked up by the next add or reload.

use crate::config::TableConfig;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// Column layout of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    /// Raw table name (without type suffix).
    pub table_name: String,
    /// Column names every loaded segment must carry.
    pub columns: Vec<String>,
}

impl Schema {
    /// Creates a schema for a raw table name.
    #[must_use]
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            columns: Vec::new(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(name.into());
        self
    }

    /// Returns the columns of this schema missing from `present`.
    #[must_use]
    pub fn missing_columns<'a, I>(&self, present: I) -> Vec<&str>
    where
        I: IntoIterator<Item = &'a str> + Clone,
    {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(|column| !present.clone().into_iter().any(|p| p == *column))
            .collect()
    }
}

/// Source of table configs and schemas, keyed by table name with type.
pub trait TableCatalog: Send + Sync {
    /// Returns the config of a table, if registered.
    fn table_config(&self, table_name_with_type: &str) -> Option<TableConfig>;

    /// Returns the schema of a table, if registered.
    fn schema(&self, table_name_with_type: &str) -> Option<Schema>;
}

/// A [`TableCatalog`] held in memory.
///
/// Entries can be changed at any time; readers see the latest value.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    configs: RwLock<HashMap<String, TableConfig>>,
    schemas: RwLock<HashMap<String, Schema>>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table config under its table name.
    pub fn put_table_config(&self, config: TableConfig) {
        self.configs
            .write()
            .insert(config.table_name.clone(), config);
    }

    /// Registers a schema for a table name with type.
    pub fn put_schema(&self, table_name_with_type: impl Into<String>, schema: Schema) {
        self.schemas
            .write()
            .insert(table_name_with_type.into(), schema);
    }

    /// Removes a table's config and schema.
    pub fn remove_table(&self, table_name_with_type: &str) {
        self.configs.write().remove(table_name_with_type);
        self.schemas.write().remove(table_name_with_type);
    }

    /// Removes only the schema of a table.
    pub fn remove_schema(&self, table_name_with_type: &str) {
        self.schemas.write().remove(table_name_with_type);
    }
}

impl TableCatalog for InMemoryCatalog {
    fn table_config(&self, table_name_with_type: &str) -> Option<TableConfig> {
        self.configs.read().get(table_name_with_type).cloned()
    }

    fn schema(&self, table_name_with_type: &str) -> Option<Schema> {
        self.schemas.read().get(table_name_with_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lookup() {
        let catalog = InMemoryCatalog::new();
        catalog.put_table_config(TableConfig::new("events_OFFLINE"));
        catalog.put_schema("events_OFFLINE", Schema::new("events").column("user_id"));

        assert!(catalog.table_config("events_OFFLINE").is_some());
        assert_eq!(
            catalog.schema("events_OFFLINE").unwrap().columns,
            vec!["user_id"]
        );
        assert!(catalog.table_config("other_OFFLINE").is_none());

        catalog.remove_table("events_OFFLINE");
        assert!(catalog.table_config("events_OFFLINE").is_none());
        assert!(catalog.schema("events_OFFLINE").is_none());
    }

    #[test]
    fn missing_columns_reported() {
        let schema = Schema::new("events").column("user_id").column("country");
        let present = ["user_id", "ts"];

        assert_eq!(schema.missing_columns(present), vec!["country"]);
        assert!(schema
            .missing_columns(["country", "user_id"])
            .is_empty());
    }
}
