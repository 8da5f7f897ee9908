//! Append-only event store boundary.
//!
//! Storage-agnostic: the pipeline only needs append, backward paging and
//! time-bounded paging.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventPage, EventStore};
