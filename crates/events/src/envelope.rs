use chrono::{DateTime, Utc};
use uuid::Uuid;

use buildup_core::{StreamId, TypeKey};

use crate::event::EventData;

/// Envelope for an event: the unit appended to a stream and published on the bus.
///
/// Notes:
/// - **Append-only**: `version` strictly increases per stream.
/// - Immutable once built; only accessors are exposed.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    event_id: Uuid,
    stream_id: StreamId,
    /// Position in the stream, starting at 1.
    version: u64,
    occurred_at: DateTime<Utc>,
    payload: EventData,
}

impl EventEnvelope {
    pub fn new(stream_id: StreamId, version: u64, payload: impl Into<EventData>) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            stream_id,
            version,
            occurred_at: Utc::now(),
            payload: payload.into(),
        }
    }

    /// Override the business time (defaults to "now").
    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn event_type(&self) -> TypeKey {
        self.payload.type_key()
    }

    pub fn payload(&self) -> &EventData {
        &self.payload
    }

    pub fn into_payload(self) -> EventData {
        self.payload
    }
}
