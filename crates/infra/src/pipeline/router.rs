//! Per-stream sequential processing.
//!
//! One router task consumes the bus subscription and hands each event to the
//! worker task owning its stream, spawning workers on first sight. Events of
//! one stream are processed strictly in arrival order; different streams
//! proceed concurrently.
//!
//! A worker idle for `idle_timeout_ms` closes its queue, finishes what is
//! already in it and exits. The next event of its stream starts a new worker,
//! which waits for the old one before processing anything.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::SendError};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error};

use buildup_core::StreamId;
use buildup_events::{BusMessage, EventBus, EventEnvelope, Subscription, SubscriptionId};

use super::{IngestionPipeline, PipelineStats, StatsCounters};
use crate::event_store::EventStore;
use crate::snapshot_store::SnapshotStore;

type Unsubscribe = Box<dyn Fn(SubscriptionId) -> bool + Send + Sync>;

/// Handle to a running pipeline.
pub struct PipelineHandle {
    subscription_id: SubscriptionId,
    unsubscribe: Unsubscribe,
    router: JoinHandle<()>,
    stats: Arc<StatsCounters>,
}

impl PipelineHandle {
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Stop delivery from the bus. Events already routed are still processed.
    pub fn unsubscribe(&self) -> bool {
        (self.unsubscribe)(self.subscription_id)
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// Wait until the bus ended (or the subscription was revoked) and every
    /// stream worker drained its queue.
    pub async fn join(self) -> PipelineStats {
        if let Err(err) = self.router.await {
            error!(error = %err, "pipeline router task failed");
        }
        self.stats.snapshot()
    }
}

impl core::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("subscription_id", &self.subscription_id)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

struct StreamWorker {
    queue: UnboundedSender<EventEnvelope>,
    /// Resolves (with an error) once the worker task has returned.
    stopped: oneshot::Receiver<()>,
}

impl StreamWorker {
    fn is_finished(&mut self) -> bool {
        self.queue.is_closed() && matches!(self.stopped.try_recv(), Err(TryRecvError::Closed))
    }
}

impl<ES, SS> IngestionPipeline<ES, SS>
where
    ES: EventStore + 'static,
    SS: SnapshotStore + 'static,
{
    /// Subscribe to `bus` and process its events on the current tokio runtime.
    pub fn spawn<B>(&self, bus: Arc<B>) -> PipelineHandle
    where
        B: EventBus<EventEnvelope> + ?Sized + 'static,
    {
        let subscription = bus.subscribe();
        let subscription_id = subscription.id();
        debug!(pipeline = %self.config.name, %subscription_id, "pipeline subscribed");

        let router = tokio::spawn(route(self.clone(), subscription));
        PipelineHandle {
            subscription_id,
            unsubscribe: Box::new(move |id| bus.unsubscribe(id)),
            router,
            stats: self.counters().clone(),
        }
    }
}

async fn route<ES, SS>(pipeline: IngestionPipeline<ES, SS>, mut subscription: Subscription<EventEnvelope>)
where
    ES: EventStore + 'static,
    SS: SnapshotStore + 'static,
{
    let mut workers: HashMap<StreamId, StreamWorker> = HashMap::new();
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            message = subscription.recv() => match message {
                Some(BusMessage::Event(event)) => {
                    pipeline.note_received();
                    dispatch(&pipeline, &mut workers, &mut tasks, event);
                }
                Some(BusMessage::End) => {
                    debug!(pipeline = %pipeline.config.name, "end of stream");
                    break;
                }
                None => break,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                reap(&pipeline, &mut workers, joined);
            }
        }
    }

    // Closing the queues lets every worker finish what it already holds.
    drop(workers);
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(pipeline = %pipeline.config.name, error = %err, "stream worker failed");
        }
    }
    debug!(pipeline = %pipeline.config.name, "pipeline drained");
}

fn dispatch<ES, SS>(
    pipeline: &IngestionPipeline<ES, SS>,
    workers: &mut HashMap<StreamId, StreamWorker>,
    tasks: &mut JoinSet<StreamId>,
    mut event: EventEnvelope,
) where
    ES: EventStore + 'static,
    SS: SnapshotStore + 'static,
{
    let stream_id = event.stream_id();
    if let Some(worker) = workers.get(&stream_id) {
        match worker.queue.send(event) {
            Ok(()) => return,
            Err(SendError(returned)) => event = returned,
        }
    }

    let previous = workers.remove(&stream_id).map(|worker| worker.stopped);
    if previous.is_some() {
        debug!(%stream_id, "stream worker stopped; starting a new one");
    }

    let (queue, inbox) = mpsc::unbounded_channel();
    let (running, stopped) = oneshot::channel();
    pipeline.note_stream_started(stream_id);
    tasks.spawn(run_worker(pipeline.clone(), stream_id, inbox, previous, running));
    if let Err(SendError(event)) = queue.send(event) {
        error!(%stream_id, version = event.version(), "new stream worker is gone; event dropped");
    }
    workers.insert(stream_id, StreamWorker { queue, stopped });
}

/// Forget a worker that exited, unless its stream already has a live one.
fn reap<ES, SS>(
    pipeline: &IngestionPipeline<ES, SS>,
    workers: &mut HashMap<StreamId, StreamWorker>,
    joined: Result<StreamId, JoinError>,
) {
    match joined {
        Ok(stream_id) => {
            if workers.get_mut(&stream_id).is_some_and(StreamWorker::is_finished) {
                workers.remove(&stream_id);
            }
        }
        Err(err) => {
            error!(pipeline = %pipeline.config.name, error = %err, "stream worker failed");
        }
    }
}

async fn run_worker<ES, SS>(
    pipeline: IngestionPipeline<ES, SS>,
    stream_id: StreamId,
    mut inbox: UnboundedReceiver<EventEnvelope>,
    previous: Option<oneshot::Receiver<()>>,
    _running: oneshot::Sender<()>,
) -> StreamId
where
    ES: EventStore + 'static,
    SS: SnapshotStore + 'static,
{
    if let Some(previous) = previous {
        // The stopped worker may still be finishing events routed to it.
        let _ = previous.await;
    }

    let idle_timeout = pipeline.config.idle_timeout();
    loop {
        let next = match idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, inbox.recv()).await {
                Ok(next) => next,
                Err(_elapsed) => {
                    debug!(%stream_id, "stream worker idle; stopping");
                    inbox.close();
                    while let Some(event) = inbox.recv().await {
                        pipeline.process(event).await;
                    }
                    pipeline.note_idle_stop();
                    break;
                }
            },
            None => inbox.recv().await,
        };
        match next {
            Some(event) => {
                pipeline.process(event).await;
            }
            None => break,
        }
    }
    debug!(%stream_id, "stream worker drained");
    stream_id
}
