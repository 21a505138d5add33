//! # segstore Storage
//!
//! On-disk segment directory layer for segstore.
//!
//! This crate is the lowest level of the segment lifecycle stack. It knows
//! how a segment directory is laid out and how to move it around on disk,
//! but nothing about tables, locks, reference counts, or reloads.
//!
//! ## Contents
//!
//! - [`layout`] - reserved directory suffixes used as crash-recovery markers
//! - [`SegmentFs`] - the filesystem operations the reload protocol relies on
//! - [`LocalFs`] - `SegmentFs` backed by the OS filesystem
//! - [`format`] - the segment directory format (manifest + column files)
//!
//! ## Example
//!
//! ```rust
//! use segstore_storage::{LocalFs, SegmentFs, SegmentWriter};
//!
//! let temp = tempfile::tempdir().unwrap();
//! let dir = temp.path().join("events_2024_01");
//!
//! SegmentWriter::new("events_OFFLINE", "events_2024_01")
//!     .total_docs(3)
//!     .column("user_id", vec![1u8, 2, 3])
//!     .write(&dir)
//!     .unwrap();
//!
//! assert!(LocalFs::new().is_dir(&dir));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod format;
mod fs;
pub mod layout;

pub use error::{StorageError, StorageResult};
pub use format::{SegmentManifest, SegmentWriter, MANIFEST_FILE};
pub use fs::{LocalFs, SegmentFs};
