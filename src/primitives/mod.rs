// Reusable join/aggregation building blocks shared by all detectors.
// Everything here operates under a bounded memory budget, spilling
// intermediate state to scoped scratch storage when it is exceeded.

pub mod group;
pub mod join;
pub mod percentile;
pub mod scratch;
pub mod sort;
pub mod window;

pub use group::group_sorted;
pub use join::{merge_join, JoinKind};
pub use scratch::ScratchSpace;
pub use sort::{ExternalSorter, MemSize};
