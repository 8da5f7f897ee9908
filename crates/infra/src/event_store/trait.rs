use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use buildup_core::{StorageError, StreamId};
use buildup_events::EventEnvelope;

/// One page of a stream, newest-first by cursor but ascending within the page.
///
/// `total` is the number of events in the stream matching the query's filter
/// (all of them for version paging, those at or before the timestamp for
/// as-of paging); `max_version_seen` is the highest version in `events`
/// (0 for an empty page).
#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub events: Vec<EventEnvelope>,
    pub total: u64,
    pub max_version_seen: u64,
}

impl EventPage {
    pub fn new(events: Vec<EventEnvelope>, total: u64) -> Self {
        let max_version_seen = events.iter().map(EventEnvelope::version).max().unwrap_or(0);
        Self {
            events,
            total,
            max_version_seen,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Lowest version in the page; the exclusive cursor for the next (older) page.
    pub fn min_version(&self) -> Option<u64> {
        self.events.first().map(EventEnvelope::version)
    }
}

/// Append-only event store.
///
/// Streams are identified by [`StreamId`]; within a stream versions strictly
/// increase. Paging runs backwards: a page holds the `page_size` most recent
/// events at or below the cursor, in ascending version order.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Allocate a new, empty stream.
    async fn create_stream(&self) -> Result<StreamId, StorageError>;

    /// Append events (possibly for several streams) atomically.
    ///
    /// Unknown streams are created on first append. Each event's version must
    /// be greater than the last stored version of its stream.
    async fn append_events(&self, events: Vec<EventEnvelope>) -> Result<(), StorageError>;

    async fn get_event_page(
        &self,
        stream_id: StreamId,
        max_version: u64,
        page_size: usize,
    ) -> Result<EventPage, StorageError>;

    /// Like [`EventStore::get_event_page`] from the top of the stream, restricted
    /// to events that occurred at or before `as_of`.
    async fn get_event_page_as_of(
        &self,
        stream_id: StreamId,
        as_of: DateTime<Utc>,
        page_size: usize,
    ) -> Result<EventPage, StorageError>;
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn create_stream(&self) -> Result<StreamId, StorageError> {
        (**self).create_stream().await
    }

    async fn append_events(&self, events: Vec<EventEnvelope>) -> Result<(), StorageError> {
        (**self).append_events(events).await
    }

    async fn get_event_page(
        &self,
        stream_id: StreamId,
        max_version: u64,
        page_size: usize,
    ) -> Result<EventPage, StorageError> {
        (**self).get_event_page(stream_id, max_version, page_size).await
    }

    async fn get_event_page_as_of(
        &self,
        stream_id: StreamId,
        as_of: DateTime<Utc>,
        page_size: usize,
    ) -> Result<EventPage, StorageError> {
        (**self).get_event_page_as_of(stream_id, as_of, page_size).await
    }
}
