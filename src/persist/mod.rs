//! Durable snapshotting and crash recovery
//!
//! The full day-session aggregate is serialized as-is (no delta encoding)
//! on a schedule and on lifecycle events. Recovery surfaces the single
//! unfinished session and leaves the resume/discard decision to the caller.

mod recovery;
mod store;

pub use recovery::{RecoveryCoordinator, RecoverySummary};
pub use store::{FileSnapshotStore, SnapshotStore};
