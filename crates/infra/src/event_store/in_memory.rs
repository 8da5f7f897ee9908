use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use buildup_core::{StorageError, StreamId};
use buildup_events::EventEnvelope;

use super::r#trait::{EventPage, EventStore};

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamId, Vec<EventEnvelope>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events stored for `stream_id` (0 for unknown streams).
    pub fn event_count(&self, stream_id: StreamId) -> Result<usize, StorageError> {
        Ok(self.read()?.get(&stream_id).map_or(0, Vec::len))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<StreamId, Vec<EventEnvelope>>>, StorageError> {
        self.streams
            .read()
            .map_err(|_| StorageError::backend("lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<StreamId, Vec<EventEnvelope>>>, StorageError> {
        self.streams
            .write()
            .map_err(|_| StorageError::backend("lock poisoned"))
    }

    fn current_version(stream: &[EventEnvelope]) -> u64 {
        stream.last().map(EventEnvelope::version).unwrap_or(0)
    }
}

fn check_page_size(page_size: usize) -> Result<(), StorageError> {
    if page_size == 0 {
        return Err(StorageError::backend("page size must be positive"));
    }
    Ok(())
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn create_stream(&self) -> Result<StreamId, StorageError> {
        let stream_id = StreamId::new();
        self.write()?.insert(stream_id, Vec::new());
        Ok(stream_id)
    }

    async fn append_events(&self, events: Vec<EventEnvelope>) -> Result<(), StorageError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut streams = self.write()?;

        // Validate the whole batch before touching any stream (all or nothing).
        let mut last_seen: HashMap<StreamId, u64> = HashMap::new();
        for event in &events {
            let stream_id = event.stream_id();
            let last = match last_seen.entry(stream_id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(
                    streams
                        .get(&stream_id)
                        .map_or(0, |stream| Self::current_version(stream)),
                ),
            };
            if event.version() <= *last {
                return Err(StorageError::VersionConflict {
                    stream_id,
                    last: *last,
                    found: event.version(),
                });
            }
            *last = event.version();
        }

        for event in events {
            streams.entry(event.stream_id()).or_default().push(event);
        }
        Ok(())
    }

    async fn get_event_page(
        &self,
        stream_id: StreamId,
        max_version: u64,
        page_size: usize,
    ) -> Result<EventPage, StorageError> {
        check_page_size(page_size)?;
        let streams = self.read()?;
        let stream = streams
            .get(&stream_id)
            .ok_or(StorageError::StreamNotFound(stream_id))?;

        let upto = stream.partition_point(|e| e.version() <= max_version);
        let start = upto.saturating_sub(page_size);
        Ok(EventPage::new(stream[start..upto].to_vec(), stream.len() as u64))
    }

    async fn get_event_page_as_of(
        &self,
        stream_id: StreamId,
        as_of: DateTime<Utc>,
        page_size: usize,
    ) -> Result<EventPage, StorageError> {
        check_page_size(page_size)?;
        let streams = self.read()?;
        let stream = streams
            .get(&stream_id)
            .ok_or(StorageError::StreamNotFound(stream_id))?;

        let matching: Vec<&EventEnvelope> =
            stream.iter().filter(|e| e.occurred_at() <= as_of).collect();
        let start = matching.len().saturating_sub(page_size);
        let events = matching[start..].iter().map(|&e| e.clone()).collect();
        Ok(EventPage::new(events, matching.len() as u64))
    }
}
