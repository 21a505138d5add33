//! Segment handles and loading.
//!
//! A segment is either immutable (loaded from a persisted directory and
//! eligible for reload) or consuming (built in memory from a stream). Both
//! are wrapped in the [`Segment`] enum so that code paths that only make
//! sense for one kind have to say so explicitly.

mod handle;
mod loader;

pub use handle::{ConsumingSegment, ImmutableSegment, Segment, SegmentMetadata};
pub use loader::{DirectorySegmentLoader, SegmentLoader};
