//! Snapshot persistence boundary.
//!
//! Writes are optimistic: each stream has a snapshot revision (the highest
//! current snapshot version, 0 when none) and `store_snapshots` only succeeds
//! when the caller's expectation matches it.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemorySnapshotStore;
pub use r#trait::{SnapshotStore, snapshot_revision};
