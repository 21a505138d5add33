//! # segstore Testkit
//!
//! Test utilities for segstore.
//!
//! This crate provides:
//! - Temporary instances with registered tables
//! - Crash injection and recovery verification for the reload protocol
//! - Instrumented loaders for observing reload concurrency
//! - Property-based test generators using proptest
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segstore_testkit::prelude::*;
//!
//! #[test]
//! fn test_reload() {
//!     with_temp_instance(|instance| {
//!         instance.add_offline("events_0", 10);
//!         instance.reload_segment(OFFLINE_TABLE, "events_0").unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod loaders;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::loaders::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use loaders::*;
pub use stress::*;
