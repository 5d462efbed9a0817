//! The log engine
//!
//! Each log is one JSON array in the substrate. Appends allocate offsets by
//! optimistic read-CAS, polls read ranges, and committed offsets are tracked
//! in process memory.

pub mod append;
pub mod commit;
pub mod poll;
pub mod sequence;
pub mod store;

pub use append::{AppendEngine, KeyLocks, RetryPolicy};
pub use commit::{CommitStore, CommitTracker};
pub use poll::{PollEngine, PollResult};
pub use sequence::{Entry, LogSequence, Offset};
pub use store::LogStore;
