//! Full-history replay.
//!
//! Pages backwards from the top of a stream until the store's reported total
//! has been read, then materializes snapshots from the complete, ascending
//! history. A failed page read restarts the accumulation from scratch.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use buildup_core::{ExpectedVersion, StorageError, StreamId};
use buildup_events::{EventData, EventEnvelope, Projection, Snapshot};

use super::{IngestionPipeline, PipelineError, SnapshotUpdate};
use crate::event_store::{EventPage, EventStore};
use crate::snapshot_store::SnapshotStore;

/// Read a stream's whole history, oldest first.
pub async fn read_history<ES>(
    store: &ES,
    stream_id: StreamId,
    page_size: usize,
) -> Result<Vec<EventEnvelope>, StorageError>
where
    ES: EventStore + ?Sized,
{
    let first = store.get_event_page(stream_id, u64::MAX, page_size).await?;
    collect_pages(store, stream_id, page_size, first, |_| true).await
}

/// Read the part of a stream's history that occurred at or before `as_of`, oldest first.
pub async fn read_history_as_of<ES>(
    store: &ES,
    stream_id: StreamId,
    as_of: DateTime<Utc>,
    page_size: usize,
) -> Result<Vec<EventEnvelope>, StorageError>
where
    ES: EventStore + ?Sized,
{
    let first = store
        .get_event_page_as_of(stream_id, as_of, page_size)
        .await?;
    collect_pages(store, stream_id, page_size, first, |e| e.occurred_at() <= as_of).await
}

async fn collect_pages<ES, F>(
    store: &ES,
    stream_id: StreamId,
    page_size: usize,
    first: EventPage,
    keep: F,
) -> Result<Vec<EventEnvelope>, StorageError>
where
    ES: EventStore + ?Sized,
    F: Fn(&EventEnvelope) -> bool,
{
    let total = first.total;
    let mut pages: Vec<Vec<EventEnvelope>> = Vec::new();
    let mut loaded = 0u64;
    let mut page = first;

    while let Some(lowest) = page.min_version() {
        let events: Vec<EventEnvelope> = page.events.into_iter().filter(|e| keep(e)).collect();
        loaded += events.len() as u64;
        pages.push(events);
        if loaded >= total || lowest == 0 {
            break;
        }
        page = store.get_event_page(stream_id, lowest - 1, page_size).await?;
    }

    if loaded != total {
        return Err(StorageError::inconsistent(format!(
            "stream {stream_id} reported {total} events but {loaded} were read"
        )));
    }

    Ok(pages.into_iter().rev().flatten().collect())
}

impl<ES, SS> IngestionPipeline<ES, SS>
where
    ES: EventStore + 'static,
    SS: SnapshotStore + 'static,
{
    /// Load the stream's history, retrying failed reads `replay_retries` times.
    pub async fn load_history(&self, stream_id: StreamId) -> Result<Vec<EventEnvelope>, PipelineError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match read_history(self.events.as_ref(), stream_id, self.config.page_size).await {
                Ok(history) => return Ok(history),
                Err(err) if attempt <= self.config.replay_retries => {
                    warn!(%stream_id, attempt, error = %err, "history read failed; restarting");
                }
                Err(source) => {
                    return Err(PipelineError::ReplayExhausted {
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    /// Build snapshots from the stream's complete history and persist them as
    /// the stream's first snapshots. They carry the version of the last event.
    pub(crate) async fn replay(&self, stream_id: StreamId) -> Result<SnapshotUpdate, PipelineError> {
        let history = self.load_history(stream_id).await?;
        let Some(version) = history.last().map(EventEnvelope::version) else {
            return Ok(SnapshotUpdate::UpToDate);
        };

        let payloads: Vec<EventData> = history.iter().map(|e| e.payload().clone()).collect();
        let snapshots: Vec<Snapshot> = self
            .projector
            .get_snapshots(&payloads)?
            .into_iter()
            .map(|s| s.with_version(version))
            .collect();

        let count = snapshots.len();
        if count > 0 {
            self.snapshots
                .store_snapshots(stream_id, snapshots, ExpectedVersion::Exact(0))
                .await
                .map_err(PipelineError::Persist)?;
        }
        debug!(%stream_id, events = history.len(), snapshots = count, version, "stream replayed");
        Ok(SnapshotUpdate::Replayed {
            snapshots: count,
            version,
        })
    }

    /// Rebuild `P` from the events of `stream_id` that occurred at or before `as_of`.
    pub async fn project_as_of<P: Projection>(
        &self,
        stream_id: StreamId,
        as_of: DateTime<Utc>,
    ) -> Result<P, PipelineError> {
        let history = read_history_as_of(self.events.as_ref(), stream_id, as_of, self.config.page_size)
            .await
            .map_err(PipelineError::History)?;
        let payloads: Vec<EventData> = history.iter().map(|e| e.payload().clone()).collect();
        Ok(self.projector.project_new::<P>(&payloads)?)
    }
}
