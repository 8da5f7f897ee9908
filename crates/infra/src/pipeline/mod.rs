//! Ingestion pipeline: bus → event store → snapshots.
//!
//! Per event: append to the event store, then either replay the stream's full
//! history into fresh snapshots (no snapshots yet) or fold the single event
//! into every current snapshot. Events of one stream are processed by one
//! sequential worker (see [`router`]); snapshot writes are additionally
//! guarded by optimistic concurrency and retried on conflict.
//!
//! Failures never reach the publisher. They are logged and routed to a
//! [`DeadLetterQueue`] so they can be inspected and redriven. While a stream
//! has an entry in the queue, its later events are parked there too, so a
//! redrive replays the stream's backlog in order.

pub mod dead_letter;
pub mod replay;
pub mod router;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use buildup_core::{BuildUpError, ExpectedVersion, StorageError, StreamId};
use buildup_events::{EventEnvelope, Projector};

use crate::config::PipelineConfig;
use crate::event_store::EventStore;
use crate::snapshot_store::{SnapshotStore, snapshot_revision};

pub use dead_letter::{
    DeadLetterEntry, DeadLetterQueue, DeadLetterSummary, FailureStage, InMemoryDeadLetterQueue,
};
pub use router::PipelineHandle;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("appending event failed: {0}")]
    Append(#[source] StorageError),

    #[error("loading snapshots failed: {0}")]
    LoadSnapshots(#[source] StorageError),

    #[error("replay gave up after {attempts} attempts: {source}")]
    ReplayExhausted {
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("reading stream history failed: {0}")]
    History(#[source] StorageError),

    #[error(transparent)]
    Projection(#[from] BuildUpError),

    #[error("persisting snapshots failed: {0}")]
    Persist(#[source] StorageError),
}

impl PipelineError {
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::Append(_) => FailureStage::Append,
            Self::LoadSnapshots(_) => FailureStage::LoadSnapshots,
            Self::ReplayExhausted { .. } | Self::History(_) => FailureStage::Replay,
            Self::Projection(_) => FailureStage::Projection,
            Self::Persist(_) => FailureStage::Persist,
        }
    }

    fn is_conflict(&self) -> bool {
        matches!(self, Self::Persist(err) if err.is_concurrency())
    }
}

/// What the snapshot step did for one event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SnapshotUpdate {
    /// Snapshots were built from the stream's whole history.
    Replayed { snapshots: usize, version: u64 },
    /// The event was folded into existing snapshots.
    Folded { snapshots: usize, version: u64 },
    /// Every snapshot already covers this event.
    UpToDate,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    received: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    replays: AtomicU64,
    folds: AtomicU64,
    conflicts: AtomicU64,
    parked: AtomicU64,
    redeliveries: AtomicU64,
    streams: AtomicU64,
    idle_stops: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            folds: self.folds.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            parked: self.parked.load(Ordering::Relaxed),
            redeliveries: self.redeliveries.load(Ordering::Relaxed),
            streams: self.streams.load(Ordering::Relaxed),
            idle_stops: self.idle_stops.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time pipeline counters.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Events taken off the bus.
    pub received: u64,
    pub processed: u64,
    /// Events routed to the dead-letter queue.
    pub failed: u64,
    pub replays: u64,
    pub folds: u64,
    /// Snapshot writes rejected by optimistic concurrency.
    pub conflicts: u64,
    /// Events held back behind a dead-lettered event of the same stream.
    pub parked: u64,
    /// Events that were already in the event store under the same id.
    pub redeliveries: u64,
    /// Stream workers started.
    pub streams: u64,
    /// Stream workers stopped for being idle.
    pub idle_stops: u64,
}

/// Outcome of [`IngestionPipeline::redrive_dead_letters`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedriveReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Left in the queue behind an event of the same stream that failed again.
    pub parked: usize,
}

pub struct IngestionPipeline<ES, SS> {
    projector: Arc<Projector>,
    events: Arc<ES>,
    snapshots: Arc<SS>,
    config: PipelineConfig,
    dead_letters: Arc<dyn DeadLetterQueue>,
    stats: Arc<StatsCounters>,
}

impl<ES, SS> Clone for IngestionPipeline<ES, SS> {
    fn clone(&self) -> Self {
        Self {
            projector: self.projector.clone(),
            events: self.events.clone(),
            snapshots: self.snapshots.clone(),
            config: self.config.clone(),
            dead_letters: self.dead_letters.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<ES, SS> core::fmt::Debug for IngestionPipeline<ES, SS> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl<ES, SS> IngestionPipeline<ES, SS>
where
    ES: EventStore + 'static,
    SS: SnapshotStore + 'static,
{
    pub fn new(
        projector: Arc<Projector>,
        events: Arc<ES>,
        snapshots: Arc<SS>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            projector,
            events,
            snapshots,
            config,
            dead_letters: Arc::new(InMemoryDeadLetterQueue::new()),
            stats: Arc::new(StatsCounters::default()),
        }
    }

    pub fn with_dead_letter_queue(mut self, dead_letters: Arc<dyn DeadLetterQueue>) -> Self {
        self.dead_letters = dead_letters;
        self
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    pub fn event_store(&self) -> &ES {
        &self.events
    }

    pub fn snapshot_store(&self) -> &SS {
        &self.snapshots
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dead_letters(&self) -> &dyn DeadLetterQueue {
        self.dead_letters.as_ref()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// Append `event`, then bring the stream's snapshots up to date.
    #[instrument(
        skip_all,
        fields(
            pipeline = %self.config.name,
            stream_id = %event.stream_id(),
            version = event.version(),
            event_type = %event.event_type()
        ),
        err
    )]
    pub async fn handle_event(&self, event: &EventEnvelope) -> Result<SnapshotUpdate, PipelineError> {
        if let Err(err) = self.events.append_events(vec![event.clone()]).await {
            if !self.is_redelivery(event, &err).await {
                return Err(PipelineError::Append(err));
            }
            debug!("event already stored; bringing snapshots up to date only");
            StatsCounters::bump(&self.stats.redeliveries);
        }
        self.update_snapshots(event).await
    }

    /// A version conflict caused by the very same event being delivered again.
    async fn is_redelivery(&self, event: &EventEnvelope, err: &StorageError) -> bool {
        if !matches!(err, StorageError::VersionConflict { .. }) {
            return false;
        }
        match self
            .events
            .get_event_page(event.stream_id(), event.version(), 1)
            .await
        {
            Ok(page) => page.events.last().is_some_and(|stored| {
                stored.version() == event.version() && stored.event_id() == event.event_id()
            }),
            Err(lookup) => {
                warn!(error = %lookup, "could not check for redelivery");
                false
            }
        }
    }

    /// Snapshot step for an event already in the event store.
    ///
    /// Restarted (re-reading snapshots) when the write loses an optimistic
    /// concurrency race, up to `conflict_retries` times.
    pub async fn update_snapshots(&self, event: &EventEnvelope) -> Result<SnapshotUpdate, PipelineError> {
        let mut attempt = 0;
        loop {
            match self.try_update_snapshots(event).await {
                Err(err) if err.is_conflict() && attempt < self.config.conflict_retries => {
                    attempt += 1;
                    StatsCounters::bump(&self.stats.conflicts);
                    warn!(attempt, error = %err, "snapshot write rejected; retrying");
                }
                Err(err) => {
                    if err.is_conflict() {
                        StatsCounters::bump(&self.stats.conflicts);
                    }
                    return Err(err);
                }
                Ok(update) => return Ok(update),
            }
        }
    }

    async fn try_update_snapshots(&self, event: &EventEnvelope) -> Result<SnapshotUpdate, PipelineError> {
        let stream_id = event.stream_id();
        let current = self
            .snapshots
            .get_snapshots(stream_id)
            .await
            .map_err(PipelineError::LoadSnapshots)?;

        if current.is_empty() {
            return self.replay(stream_id).await;
        }

        let revision = snapshot_revision(&current);
        let mut updated = Vec::with_capacity(current.len());
        for snapshot in current {
            // Redelivered or already replayed.
            if snapshot.version() >= event.version() {
                continue;
            }
            updated.push(self.projector.project_snapshot(
                snapshot,
                std::slice::from_ref(event.payload()),
                event.version(),
            )?);
        }

        if updated.is_empty() {
            debug!("snapshots already cover this event");
            return Ok(SnapshotUpdate::UpToDate);
        }

        let count = updated.len();
        self.snapshots
            .store_snapshots(stream_id, updated, ExpectedVersion::Exact(revision))
            .await
            .map_err(PipelineError::Persist)?;
        debug!(snapshots = count, "snapshots folded");
        Ok(SnapshotUpdate::Folded {
            snapshots: count,
            version: event.version(),
        })
    }

    /// Handle one event and account for the outcome. Failures are logged and
    /// dead-lettered; returns whether the event was processed.
    ///
    /// An event whose stream already has a dead letter is parked behind it
    /// without being appended.
    pub async fn process(&self, event: EventEnvelope) -> bool {
        if self.dead_letters.holds_stream(event.stream_id()) {
            self.park(event);
            return false;
        }
        match self.handle_event(&event).await {
            Ok(update) => {
                self.record(update);
                true
            }
            Err(err) => {
                self.dead_letter(event, &err);
                false
            }
        }
    }

    /// Re-process every dead-lettered event, in failure order. Events that
    /// reached the event store are not appended again. Once an event fails
    /// again, the rest of its stream's entries stay queued untouched.
    ///
    /// Runs outside the stream workers; call it while the stream is idle.
    pub async fn redrive_dead_letters(&self) -> RedriveReport {
        let mut report = RedriveReport::default();
        let mut blocked = HashSet::new();
        for entry in self.dead_letters.drain() {
            let stream_id = entry.event.stream_id();
            if blocked.contains(&stream_id) {
                self.dead_letters.push(entry);
                report.parked += 1;
                continue;
            }
            let result = if entry.stage.is_stored() {
                self.update_snapshots(&entry.event).await
            } else {
                self.handle_event(&entry.event).await
            };
            match result {
                Ok(update) => {
                    self.record(update);
                    report.succeeded += 1;
                }
                Err(err) => {
                    blocked.insert(stream_id);
                    self.dead_letter(entry.event, &err);
                    report.failed += 1;
                }
            }
        }
        debug!(
            succeeded = report.succeeded,
            failed = report.failed,
            parked = report.parked,
            "dead letters redriven"
        );
        report
    }

    fn record(&self, update: SnapshotUpdate) {
        StatsCounters::bump(&self.stats.processed);
        match update {
            SnapshotUpdate::Replayed { .. } => StatsCounters::bump(&self.stats.replays),
            SnapshotUpdate::Folded { .. } => StatsCounters::bump(&self.stats.folds),
            SnapshotUpdate::UpToDate => {}
        }
    }

    fn dead_letter(&self, event: EventEnvelope, err: &PipelineError) {
        error!(
            pipeline = %self.config.name,
            stream_id = %event.stream_id(),
            version = event.version(),
            event_type = %event.event_type(),
            stage = ?err.stage(),
            error = %err,
            "event processing failed; dead-lettering"
        );
        StatsCounters::bump(&self.stats.failed);
        self.dead_letters
            .push(DeadLetterEntry::new(event, err.stage(), err));
    }

    fn park(&self, event: EventEnvelope) {
        warn!(
            pipeline = %self.config.name,
            stream_id = %event.stream_id(),
            version = event.version(),
            event_type = %event.event_type(),
            "stream has a dead-lettered event; parking"
        );
        StatsCounters::bump(&self.stats.parked);
        self.dead_letters.push(DeadLetterEntry::new(
            event,
            FailureStage::Parked,
            "an earlier event of this stream is dead-lettered",
        ));
    }

    pub(crate) fn counters(&self) -> &Arc<StatsCounters> {
        &self.stats
    }

    pub(crate) fn note_stream_started(&self, stream_id: StreamId) {
        StatsCounters::bump(&self.stats.streams);
        debug!(pipeline = %self.config.name, %stream_id, "stream worker started");
    }

    pub(crate) fn note_idle_stop(&self) {
        StatsCounters::bump(&self.stats.idle_stops);
    }

    pub(crate) fn note_received(&self) {
        StatsCounters::bump(&self.stats.received);
    }
}
