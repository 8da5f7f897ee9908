//! In-memory event bus for tests/dev.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::debug;

use crate::bus::{BusError, BusMessage, EventBus, Subscription, SubscriptionId};

#[derive(Debug)]
struct BusState<M> {
    subscribers: Vec<(SubscriptionId, UnboundedSender<BusMessage<M>>)>,
    next_id: u64,
    closed: bool,
}

/// In-memory pub/sub bus.
///
/// - No IO; publishing never waits (unbounded queues)
/// - Fan-out in subscription order
/// - Subscribers whose receiver was dropped are pruned on publish
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    state: Mutex<BusState<M>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    // Every operation leaves the state consistent even if a holder panicked.
    fn lock(&self) -> MutexGuard<'_, BusState<M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            state: Mutex::new(BusState {
                subscribers: Vec::new(),
                next_id: 0,
                closed: false,
            }),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = BusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut state = self.lock();
        if state.closed {
            return Err(BusError::Closed);
        }

        // Drop any dead subscribers while publishing.
        state
            .subscribers
            .retain(|(_, tx)| tx.send(BusMessage::Event(message.clone())).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.next_id += 1;
        let id = SubscriptionId::new(state.next_id);
        state.subscribers.push((id, tx));
        Subscription::new(id, rx)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sub, _)| *sub != id);
        state.subscribers.len() != before
    }

    fn begin(&self) {
        self.lock().closed = false;
    }

    fn end(&self) {
        let mut state = self.lock();
        for (_, tx) in state.subscribers.drain(..) {
            // A subscriber that already went away has nothing left to finish.
            let _ = tx.send(BusMessage::End);
        }
        state.closed = true;
        debug!("event bus ended");
    }
}
