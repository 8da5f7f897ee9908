//! Infrastructure: event and snapshot stores, pipeline configuration and the
//! ingestion pipeline that keeps snapshots in step with the event bus.

pub mod config;
pub mod event_store;
pub mod pipeline;
pub mod snapshot_store;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, PipelineConfig};
pub use event_store::{EventPage, EventStore, InMemoryEventStore};
pub use pipeline::{
    DeadLetterEntry, DeadLetterQueue, DeadLetterSummary, FailureStage, InMemoryDeadLetterQueue,
    IngestionPipeline, PipelineError, PipelineHandle, PipelineStats, RedriveReport, SnapshotUpdate,
};
pub use snapshot_store::{InMemorySnapshotStore, SnapshotStore};
