//! Dead-letter queue for events the pipeline could not process.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use buildup_core::StreamId;
use buildup_events::EventEnvelope;

/// Pipeline step an event failed in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Append,
    LoadSnapshots,
    Replay,
    Projection,
    Persist,
    /// Not attempted: an earlier event of the stream is dead-lettered.
    Parked,
}

impl FailureStage {
    /// Whether the event already reached the event store before failing.
    pub fn is_stored(&self) -> bool {
        !matches!(self, Self::Append | Self::Parked)
    }
}

#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub event: EventEnvelope,
    pub stage: FailureStage,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(event: EventEnvelope, stage: FailureStage, error: impl ToString) -> Self {
        Self {
            id: Uuid::now_v7(),
            event,
            stage,
            error: error.to_string(),
            failed_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> DeadLetterSummary {
        DeadLetterSummary {
            id: self.id,
            event_id: self.event.event_id(),
            stream_id: self.event.stream_id(),
            version: self.event.version(),
            event_type: self.event.event_type().short_name().to_string(),
            stage: self.stage,
            error: self.error.clone(),
            failed_at: self.failed_at,
        }
    }
}

/// Serializable view of a [`DeadLetterEntry`] (the payload itself is not serializable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetterSummary {
    pub id: Uuid,
    pub event_id: Uuid,
    pub stream_id: StreamId,
    pub version: u64,
    pub event_type: String,
    pub stage: FailureStage,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

pub trait DeadLetterQueue: Send + Sync {
    fn push(&self, entry: DeadLetterEntry);

    /// Entries in failure order, left in place.
    fn list(&self) -> Vec<DeadLetterEntry>;

    /// Remove and return every entry, in failure order.
    fn drain(&self) -> Vec<DeadLetterEntry>;

    /// Whether any entry belongs to `stream_id`.
    fn holds_stream(&self, stream_id: StreamId) -> bool {
        self.list().iter().any(|e| e.event.stream_id() == stream_id)
    }

    fn len(&self) -> usize {
        self.list().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // A push is a single Vec::push; a poisoned lock still holds a usable list.
    fn lock(&self) -> MutexGuard<'_, Vec<DeadLetterEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeadLetterQueue for InMemoryDeadLetterQueue {
    fn push(&self, entry: DeadLetterEntry) {
        self.lock().push(entry);
    }

    fn list(&self) -> Vec<DeadLetterEntry> {
        self.lock().clone()
    }

    fn drain(&self) -> Vec<DeadLetterEntry> {
        std::mem::take(&mut *self.lock())
    }

    fn holds_stream(&self, stream_id: StreamId) -> bool {
        self.lock().iter().any(|e| e.event.stream_id() == stream_id)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use buildup_events::Event;

    use super::*;

    #[derive(Debug)]
    struct Shipped;
    impl Event for Shipped {}

    #[test]
    fn drain_empties_in_failure_order() {
        let queue = InMemoryDeadLetterQueue::new();
        let stream_id = StreamId::new();
        queue.push(DeadLetterEntry::new(
            EventEnvelope::new(stream_id, 1, Shipped),
            FailureStage::Append,
            "disk full",
        ));
        queue.push(DeadLetterEntry::new(
            EventEnvelope::new(stream_id, 2, Shipped),
            FailureStage::Persist,
            "conflict",
        ));
        assert_eq!(queue.len(), 2);

        let drained = queue.drain();
        assert_eq!(
            drained.iter().map(|e| e.event.version()).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(queue.is_empty());
        assert!(!queue.holds_stream(stream_id));
    }

    #[test]
    fn holds_stream_only_for_queued_streams() {
        let queue = InMemoryDeadLetterQueue::new();
        let stuck = StreamId::new();
        queue.push(DeadLetterEntry::new(
            EventEnvelope::new(stuck, 4, Shipped),
            FailureStage::Replay,
            "store offline",
        ));

        assert!(queue.holds_stream(stuck));
        assert!(!queue.holds_stream(StreamId::new()));
    }

    #[test]
    fn summary_serializes_stage_in_snake_case() {
        let entry = DeadLetterEntry::new(
            EventEnvelope::new(StreamId::new(), 3, Shipped),
            FailureStage::LoadSnapshots,
            "timeout",
        );
        let json = serde_json::to_value(entry.summary()).unwrap();
        assert_eq!(json["stage"], "load_snapshots");
        assert_eq!(json["version"], 3);
        assert_eq!(json["event_type"], "Shipped");
        assert!(!FailureStage::Append.is_stored());
        assert!(!FailureStage::Parked.is_stored());
        assert!(FailureStage::Persist.is_stored());
    }
}
