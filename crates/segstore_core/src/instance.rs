//! The instance registry.
//!
//! [`InstanceDataManager`] owns every table served by one instance and
//! routes lifecycle commands (add, remove, reload) and metadata queries to
//! them. Table collections are created lazily on first assignment.
//!
//! # Lock order
//!
//! 1. Reload admission gate (reloads and offline refreshes only)
//! 2. Segment lock
//! 3. Table map lock, held only for pointer-level updates
//!
//! No lock is held while waiting on the gate.

use crate::catalog::{Schema, TableCatalog};
use crate::config::{IndexLoadingConfig, InstanceConfig, TableConfig};
use crate::dir::InstanceDataDir;
use crate::error::{CoreError, CoreResult};
use crate::gate::{ReloadGate, ReloadPermit};
use crate::lock::SegmentLocks;
use crate::recovery;
use crate::reload::{ReloadOutcome, ReloadSummary, SegmentReloader, SkipReason};
use crate::segment::{
    ConsumingSegment, DirectorySegmentLoader, Segment, SegmentLoader, SegmentMetadata,
};
use crate::stats::InstanceStats;
use crate::table::{SegmentRef, TableSegments};
use crate::types::{validate_segment_name, validate_table_name, TableType};
use parking_lot::RwLock;
use segstore_storage::{LocalFs, SegmentFs};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Opened and recovered, not yet started.
    Initialized,
    /// Serving.
    Started,
    /// Shut down; lifecycle commands are rejected.
    ShutDown,
}

/// Segment storage of one server instance.
///
/// # Thread Safety
///
/// All methods take `&self`. Query threads acquire and release segments,
/// lifecycle threads add, remove, and reload them, and admin threads read
/// metadata, all concurrently.
pub struct InstanceDataManager {
    config: InstanceConfig,
    dir: InstanceDataDir,
    catalog: Arc<dyn TableCatalog>,
    loader: Arc<dyn SegmentLoader>,
    fs: Arc<dyn SegmentFs>,
    tables: RwLock<HashMap<String, Arc<TableSegments>>>,
    locks: SegmentLocks,
    gate: ReloadGate,
    stats: Arc<InstanceStats>,
    state: RwLock<LifecycleState>,
}

impl InstanceDataManager {
    /// Opens an instance with the directory loader and local filesystem.
    ///
    /// # Errors
    ///
    /// See [`InstanceDataManager::open_with`].
    pub fn open(config: InstanceConfig, catalog: Arc<dyn TableCatalog>) -> CoreResult<Self> {
        Self::open_with(
            config,
            catalog,
            Arc::new(DirectorySegmentLoader::new()),
            Arc::new(LocalFs::new()),
        )
    }

    /// Opens an instance with explicit loader and filesystem.
    ///
    /// Creates the data and segment-tar directories if missing, locks the
    /// data directory, and recovers every interrupted reload before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created, another
    /// process holds the data directory, or the data directory cannot be
    /// listed. Segments that fail to recover are logged and counted in
    /// [`InstanceStats::recovery_failures`]; they do not fail the open.
    pub fn open_with(
        config: InstanceConfig,
        catalog: Arc<dyn TableCatalog>,
        loader: Arc<dyn SegmentLoader>,
        fs: Arc<dyn SegmentFs>,
    ) -> CoreResult<Self> {
        tracing::info!(
            instance = %config.instance_id,
            data_dir = %config.data_dir.display(),
            segment_tar_dir = %config.segment_tar_dir.display(),
            max_parallel_reloads = config.max_parallel_reloads,
            verify_on_recovery = config.verify_on_recovery,
            "initializing instance data manager"
        );

        let dir = InstanceDataDir::open(&config.data_dir, true)?;
        fs::create_dir_all(&config.segment_tar_dir)?;

        let stats = Arc::new(InstanceStats::new());
        let sweep = recovery::recover_data_dir(fs.as_ref(), dir.path(), config.verify_on_recovery)?;
        for report in &sweep.reports {
            stats.record_recovery();
            tracing::info!(
                dir = %report.index_dir.display(),
                state = %report.state,
                "recovered interrupted reload on startup"
            );
        }
        for failure in &sweep.failures {
            stats.record_recovery_failure();
            tracing::error!(
                dir = %failure.dir.display(),
                error = %failure.error,
                "failed to recover segment on startup"
            );
        }

        let gate = ReloadGate::new(config.max_parallel_reloads);

        tracing::info!(instance = %config.instance_id, "initialized instance data manager");

        Ok(Self {
            config,
            dir,
            catalog,
            loader,
            fs,
            tables: RwLock::new(HashMap::new()),
            locks: SegmentLocks::new(),
            gate,
            stats,
            state: RwLock::new(LifecycleState::Initialized),
        })
    }

    /// Marks the instance as serving.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InstanceShutDown`] after [`shut_down`](Self::shut_down).
    pub fn start(&self) -> CoreResult<()> {
        let mut state = self.state.write();
        match *state {
            LifecycleState::ShutDown => Err(CoreError::InstanceShutDown),
            LifecycleState::Started => Ok(()),
            LifecycleState::Initialized => {
                *state = LifecycleState::Started;
                tracing::info!(instance = %self.config.instance_id, "instance data manager started");
                Ok(())
            }
        }
    }

    /// Shuts the instance down.
    ///
    /// Every table drops its segments; handles still acquired by readers
    /// are disposed when released. Further lifecycle commands fail.
    pub fn shut_down(&self) {
        {
            let mut state = self.state.write();
            if *state == LifecycleState::ShutDown {
                return;
            }
            *state = LifecycleState::ShutDown;
        }

        let tables: Vec<_> = self.tables.write().drain().collect();
        for (_, table) in tables {
            table.clear();
        }
        tracing::info!(instance = %self.config.instance_id, "instance data manager shut down");
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    fn ensure_running(&self) -> CoreResult<()> {
        if self.state() == LifecycleState::ShutDown {
            return Err(CoreError::InstanceShutDown);
        }
        Ok(())
    }

    /// Runs `publish` unless the instance has shut down.
    ///
    /// The state stays read-locked while `publish` runs, so a concurrent
    /// [`shut_down`](Self::shut_down) either drains the result or makes
    /// this fail.
    fn while_running<T>(&self, publish: impl FnOnce() -> T) -> CoreResult<T> {
        let state = self.state.read();
        if *state == LifecycleState::ShutDown {
            return Err(CoreError::InstanceShutDown);
        }
        Ok(publish())
    }

    fn table_config(&self, table_name: &str) -> CoreResult<TableConfig> {
        self.catalog
            .table_config(table_name)
            .ok_or_else(|| CoreError::TableConfigNotFound {
                table: table_name.to_string(),
            })
    }

    fn schema(&self, table_name: &str) -> CoreResult<Schema> {
        self.catalog
            .schema(table_name)
            .ok_or_else(|| CoreError::SchemaNotFound {
                table: table_name.to_string(),
            })
    }

    fn admit(&self) -> CoreResult<ReloadPermit<'_>> {
        let permit = self
            .gate
            .acquire(self.config.reload_admission_timeout)
            .inspect_err(|e| tracing::warn!(error = %e, "reload admission refused"))?;
        if let Some(waited) = permit.waited() {
            self.stats.record_admission_wait();
            tracing::debug!(?waited, "reload admitted after waiting");
        }
        Ok(permit)
    }

    fn get_or_create_table(&self, table_name: &str) -> Arc<TableSegments> {
        if let Some(table) = self.tables.read().get(table_name) {
            return Arc::clone(table);
        }

        let mut tables = self.tables.write();
        Arc::clone(tables.entry(table_name.to_string()).or_insert_with(|| {
            tracing::info!(table = %table_name, "creating table segment collection");
            Arc::new(TableSegments::with_stats(
                table_name,
                Arc::clone(&self.stats),
            ))
        }))
    }

    fn check_index_dir(&self, index_dir: &Path) -> CoreResult<()> {
        if self.fs.is_dir(index_dir) {
            Ok(())
        } else if self.fs.exists(index_dir) {
            Err(CoreError::NotADirectory {
                path: index_dir.to_path_buf(),
            })
        } else {
            Err(CoreError::SegmentDirMissing {
                path: index_dir.to_path_buf(),
            })
        }
    }

    fn recover(&self, index_dir: &Path) -> CoreResult<()> {
        let report =
            recovery::recover_segment_dir(self.fs.as_ref(), index_dir, self.config.verify_on_recovery)?;
        if !report.is_noop() {
            self.stats.record_recovery();
        }
        Ok(())
    }

    /// Adds (or refreshes) an offline segment materialized in `index_dir`.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if a name is invalid, the table config
    /// is missing, or `index_dir` is not a directory, and a load error if
    /// the directory does not hold a usable segment. The table is left
    /// unchanged on error.
    pub fn add_offline_segment(
        &self,
        table_name: &str,
        segment_name: &str,
        index_dir: &Path,
    ) -> CoreResult<()> {
        self.ensure_running()?;
        validate_table_name(table_name)?;
        validate_segment_name(segment_name)?;
        tracing::info!(table = %table_name, segment = %segment_name, "adding offline segment");

        let table_config = self.table_config(table_name)?;
        let schema = self.catalog.schema(table_name);
        let loading = IndexLoadingConfig::new(&self.config, &table_config);

        let _permit = self.admit()?;
        let _lock = self.locks.lock(table_name, segment_name)?;

        self.recover(index_dir)?;
        self.check_index_dir(index_dir)?;

        let segment = self.loader.load(
            table_name,
            segment_name,
            index_dir,
            &loading,
            schema.as_ref(),
        )?;
        self.while_running(|| self.get_or_create_table(table_name).add_segment(segment))
            .inspect_err(|_| {
                tracing::warn!(table = %table_name, segment = %segment_name, "instance shut down during add, dropping segment");
            })?;

        tracing::info!(table = %table_name, segment = %segment_name, "added offline segment");
        Ok(())
    }

    /// Adds a realtime segment.
    ///
    /// If a persisted directory for the segment exists under the table's
    /// data directory, the completed segment is loaded from it. Otherwise
    /// an empty consuming segment is created.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if a name is invalid or the table
    /// config is missing, and a load error if the persisted directory does
    /// not hold a usable segment.
    pub fn add_realtime_segment(&self, table_name: &str, segment_name: &str) -> CoreResult<()> {
        self.ensure_running()?;
        if validate_table_name(table_name)? != TableType::Realtime {
            return Err(CoreError::invalid_table_name(
                table_name,
                "realtime segments require a _REALTIME table",
            ));
        }
        validate_segment_name(segment_name)?;
        tracing::info!(table = %table_name, segment = %segment_name, "adding realtime segment");

        let table_config = self.table_config(table_name)?;
        let schema = self.catalog.schema(table_name);
        let loading = IndexLoadingConfig::new(&self.config, &table_config);

        let _lock = self.locks.lock(table_name, segment_name)?;

        let index_dir = self.dir.segment_dir(table_name, segment_name);
        self.recover(&index_dir)?;

        let completed = self.fs.is_dir(&index_dir);
        let segment: Segment = if completed {
            self.loader
                .load(table_name, segment_name, &index_dir, &loading, schema.as_ref())?
                .into()
        } else {
            ConsumingSegment::new(table_name, segment_name).into()
        };
        self.while_running(|| self.get_or_create_table(table_name).add_segment(segment))
            .inspect_err(|_| {
                tracing::warn!(table = %table_name, segment = %segment_name, "instance shut down during add, dropping segment");
            })?;

        if completed {
            tracing::info!(table = %table_name, segment = %segment_name, "loaded completed realtime segment");
        } else {
            tracing::info!(table = %table_name, segment = %segment_name, "created consuming segment");
        }
        Ok(())
    }

    /// Removes a segment. Unknown tables and segments are a no-op.
    ///
    /// Files on disk are left in place.
    ///
    /// # Errors
    ///
    /// Returns an error after shutdown or if the calling thread already
    /// holds the segment's lock.
    pub fn remove_segment(&self, table_name: &str, segment_name: &str) -> CoreResult<()> {
        self.ensure_running()?;
        let Some(table) = self.table(table_name) else {
            return Ok(());
        };

        let _lock = self.locks.lock(table_name, segment_name)?;
        if table.remove_segment(segment_name) {
            tracing::info!(table = %table_name, segment = %segment_name, "removed segment");
        }
        Ok(())
    }

    /// Reloads one segment from its directory.
    ///
    /// Segments that are not loaded, are consuming, or have no directory
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the table config or schema is
    /// missing, [`CoreError::AdmissionTimeout`] if no reload slot freed in
    /// time, and [`CoreError::Reload`] if the protocol failed. The previous
    /// handle is kept on every error.
    pub fn reload_segment(&self, table_name: &str, segment_name: &str) -> CoreResult<ReloadOutcome> {
        self.ensure_running()?;
        tracing::info!(table = %table_name, segment = %segment_name, "reloading single segment");

        let Some(table) = self.table(table_name) else {
            self.stats.record_reload_skipped();
            return Ok(ReloadOutcome::Skipped(SkipReason::NotLoaded));
        };
        let table_config = self.table_config(table_name)?;
        let schema = self.schema(table_name)?;
        let loading = IndexLoadingConfig::new(&self.config, &table_config);

        self.reload_one(&table, segment_name, &loading, &schema)
    }

    /// Reloads every segment of a table.
    ///
    /// An unknown table yields an empty summary and counts as one skipped
    /// reload, like [`reload_segment`](Self::reload_segment) on an unknown
    /// table. One segment's failure never stops the others; each outcome is
    /// recorded in the summary. Use [`ReloadSummary::into_result`] to turn
    /// failures into an aggregate error.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the table config or schema is
    /// missing. Per-segment failures are reported in the summary.
    pub fn reload_all_segments(&self, table_name: &str) -> CoreResult<ReloadSummary> {
        self.ensure_running()?;
        tracing::info!(table = %table_name, "reloading all segments");

        let mut summary = ReloadSummary::new(table_name);
        let Some(table) = self.table(table_name) else {
            self.stats.record_reload_skipped();
            tracing::debug!(table = %table_name, "table not loaded, nothing to reload");
            return Ok(summary);
        };
        let table_config = self.table_config(table_name)?;
        let schema = self.schema(table_name)?;
        let loading = IndexLoadingConfig::new(&self.config, &table_config);

        for metadata in table.all_segments_metadata() {
            let result = self.reload_one(&table, &metadata.segment_name, &loading, &schema);
            summary.record(metadata.segment_name, result);
        }

        tracing::info!(
            table = %table_name,
            reloaded = summary.reloaded.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "reloaded all segments"
        );
        Ok(summary)
    }

    fn reload_one(
        &self,
        table: &TableSegments,
        segment_name: &str,
        loading: &IndexLoadingConfig,
        schema: &Schema,
    ) -> CoreResult<ReloadOutcome> {
        let _permit = self.admit()?;
        let lock = self.locks.lock(table.table_name(), segment_name)?;
        SegmentReloader::new(
            self.fs.as_ref(),
            self.loader.as_ref(),
            &self.stats,
            self.config.verify_on_recovery,
        )
        .reload(&lock, table, segment_name, loading, schema)
    }

    /// Acquires a segment for reading.
    #[must_use]
    pub fn acquire_segment(&self, table_name: &str, segment_name: &str) -> Option<SegmentRef> {
        self.table(table_name)?.acquire_segment(segment_name)
    }

    /// Returns the metadata of one segment, or `None` if the table or
    /// segment is unknown.
    #[must_use]
    pub fn get_segment_metadata(
        &self,
        table_name: &str,
        segment_name: &str,
    ) -> Option<SegmentMetadata> {
        self.table(table_name)?.segment_metadata(segment_name)
    }

    /// Returns the metadata of every segment of a table, sorted by name.
    #[must_use]
    pub fn get_all_segments_metadata(&self, table_name: &str) -> Vec<SegmentMetadata> {
        self.table(table_name)
            .map(|table| table.all_segments_metadata())
            .unwrap_or_default()
    }

    /// Returns the names of all tables with a segment collection.
    #[must_use]
    pub fn get_all_tables(&self) -> BTreeSet<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// Returns a table's segment collection.
    #[must_use]
    pub fn table(&self, table_name: &str) -> Option<Arc<TableSegments>> {
        self.tables.read().get(table_name).cloned()
    }

    /// Returns the data directory.
    #[must_use]
    pub fn segment_data_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the segment archive staging directory.
    #[must_use]
    pub fn segment_tar_dir(&self) -> &Path {
        &self.config.segment_tar_dir
    }

    /// Returns the reload concurrency limit.
    #[must_use]
    pub fn max_parallel_reloads(&self) -> usize {
        self.gate.capacity()
    }

    /// Returns the instance configuration.
    #[must_use]
    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// Returns the instance statistics.
    #[must_use]
    pub fn stats(&self) -> &InstanceStats {
        &self.stats
    }
}

impl fmt::Debug for InstanceDataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceDataManager")
            .field("instance_id", &self.config.instance_id)
            .field("data_dir", &self.dir.path())
            .field("tables", &self.tables.read().len())
            .field("state", &self.state())
            .finish()
    }
}
