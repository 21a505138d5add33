//! # segstore Core
//!
//! Segment lifecycle engine for one server instance.
//!
//! This crate provides:
//! - Reference-counted segment handles with scoped acquisition
//! - Per-segment mutation locks
//! - Crash-safe hot reload of persisted segments
//! - Directory-name-based crash recovery
//! - Bounded admission for concurrent reloads
//! - The instance registry routing lifecycle commands to tables
//!
//! ## Example
//!
//! ```rust
//! use segstore_core::{
//!     InMemoryCatalog, InstanceConfig, InstanceDataManager, Schema, TableConfig,
//! };
//! use segstore_storage::SegmentWriter;
//! use std::sync::Arc;
//!
//! let temp = tempfile::tempdir().unwrap();
//! let catalog = Arc::new(InMemoryCatalog::new());
//! catalog.put_table_config(TableConfig::new("events_OFFLINE"));
//! catalog.put_schema("events_OFFLINE", Schema::new("events").column("user_id"));
//!
//! let config = InstanceConfig::new()
//!     .data_dir(temp.path().join("data"))
//!     .segment_tar_dir(temp.path().join("tar"));
//! let manager = InstanceDataManager::open(config, catalog).unwrap();
//!
//! let dir = manager.segment_data_dir().join("events_OFFLINE").join("events_0");
//! SegmentWriter::new("events_OFFLINE", "events_0")
//!     .total_docs(2)
//!     .column("user_id", vec![1u8, 2])
//!     .write(&dir)
//!     .unwrap();
//!
//! manager.add_offline_segment("events_OFFLINE", "events_0", &dir).unwrap();
//! manager.reload_segment("events_OFFLINE", "events_0").unwrap();
//!
//! let segment = manager.acquire_segment("events_OFFLINE", "events_0").unwrap();
//! assert_eq!(segment.total_docs(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod config;
mod dir;
mod error;
mod gate;
mod instance;
mod lock;
pub mod recovery;
mod reload;
pub mod segment;
mod stats;
mod table;
mod types;

pub use catalog::{InMemoryCatalog, Schema, TableCatalog};
pub use config::{IndexLoadingConfig, InstanceConfig, TableConfig};
pub use dir::InstanceDataDir;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use gate::{ReloadGate, ReloadPermit};
pub use instance::{InstanceDataManager, LifecycleState};
pub use lock::{SegmentKey, SegmentLockGuard, SegmentLocks};
pub use recovery::{DataDirRecovery, RecoveryAction, RecoveryFailure, RecoveryReport, ReloadState};
pub use reload::{ReloadOutcome, ReloadStep, ReloadSummary, SegmentReloader, SkipReason};
pub use segment::{
    ConsumingSegment, DirectorySegmentLoader, ImmutableSegment, Segment, SegmentLoader,
    SegmentMetadata,
};
pub use stats::{InstanceStats, StatsSnapshot};
pub use table::{SegmentRef, TableSegments};
pub use types::{
    raw_table_name, table_name_with_type, validate_segment_name, validate_table_name, TableType,
    OFFLINE_SUFFIX, REALTIME_SUFFIX,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
