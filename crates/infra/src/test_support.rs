//! Fixtures shared by the pipeline tests.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use buildup_core::{ExpectedVersion, StorageError, StreamId};
use buildup_events::{Event, EventEnvelope, EventKind, Projector, Snapshot};

use crate::event_store::{EventPage, EventStore, InMemoryEventStore};
use crate::snapshot_store::{InMemorySnapshotStore, SnapshotStore};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Account {
    pub owner: String,
    pub balance: i64,
    pub open: bool,
}

#[derive(Debug)]
pub struct Opened {
    pub owner: String,
}

impl Opened {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
        }
    }
}

impl Event for Opened {}

#[derive(Debug)]
pub struct Deposited(pub i64);
impl Event for Deposited {}

#[derive(Debug)]
pub struct Closed;
impl Event for Closed {
    const KIND: EventKind = EventKind::Delete;
}

pub fn projector() -> Projector {
    let configured = Projector::configure(|b| {
        b.register_projection::<Account>()
            .created_by::<Opened>()
            .apply::<Opened, _>(|a, e| Account {
                owner: e.owner.clone(),
                open: true,
                ..a
            })
            .apply::<Deposited, _>(|a, e| Account {
                balance: a.balance + e.0,
                ..a
            })
            .deleted_by::<Closed>();
        Ok(())
    });
    configured.unwrap()
}

/// Event store failing a set number of appends and page reads before delegating.
#[derive(Debug, Default)]
pub struct FlakyEventStore {
    inner: InMemoryEventStore,
    append_failures: AtomicU32,
    page_failures: AtomicU32,
    page_reads: AtomicUsize,
}

impl FlakyEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_appends(self, count: u32) -> Self {
        self.append_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` appends from now on.
    pub fn fail_next_appends(&self, count: u32) {
        self.append_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_pages(self, count: u32) -> Self {
        self.page_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn inner(&self) -> &InMemoryEventStore {
        &self.inner
    }

    /// Page reads attempted, failed ones included.
    pub fn page_reads(&self) -> usize {
        self.page_reads.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EventStore for FlakyEventStore {
    async fn create_stream(&self) -> Result<StreamId, StorageError> {
        self.inner.create_stream().await
    }

    async fn append_events(&self, events: Vec<EventEnvelope>) -> Result<(), StorageError> {
        if Self::take_failure(&self.append_failures) {
            return Err(StorageError::backend("append unavailable"));
        }
        self.inner.append_events(events).await
    }

    async fn get_event_page(
        &self,
        stream_id: StreamId,
        max_version: u64,
        page_size: usize,
    ) -> Result<EventPage, StorageError> {
        self.page_reads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.page_failures) {
            return Err(StorageError::backend("page read timed out"));
        }
        self.inner.get_event_page(stream_id, max_version, page_size).await
    }

    async fn get_event_page_as_of(
        &self,
        stream_id: StreamId,
        as_of: DateTime<Utc>,
        page_size: usize,
    ) -> Result<EventPage, StorageError> {
        self.inner.get_event_page_as_of(stream_id, as_of, page_size).await
    }
}

/// Snapshot store whose first `count` writes lose an optimistic concurrency race.
#[derive(Debug, Default)]
pub struct ConflictingSnapshotStore {
    inner: InMemorySnapshotStore,
    conflicts: AtomicU32,
}

impl ConflictingSnapshotStore {
    pub fn new(count: u32) -> Self {
        Self {
            inner: InMemorySnapshotStore::new(),
            conflicts: AtomicU32::new(count),
        }
    }

    /// Reject the next `count` writes from now on.
    pub fn reject_next(&self, count: u32) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemorySnapshotStore {
        &self.inner
    }
}

#[async_trait]
impl SnapshotStore for ConflictingSnapshotStore {
    async fn get_snapshots(&self, stream_id: StreamId) -> Result<Vec<Snapshot>, StorageError> {
        self.inner.get_snapshots(stream_id).await
    }

    async fn store_snapshots(
        &self,
        stream_id: StreamId,
        snapshots: Vec<Snapshot>,
        expected: ExpectedVersion,
    ) -> Result<(), StorageError> {
        if FlakyEventStore::take_failure(&self.conflicts) {
            return Err(StorageError::concurrency("another writer stored snapshots first"));
        }
        self.inner.store_snapshots(stream_id, snapshots, expected).await
    }
}
