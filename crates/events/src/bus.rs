//! Event publishing/subscription abstraction (mechanics only).
//!
//! Subscriptions are channels: every subscriber gets its own queue of
//! [`BusMessage`]s. `end()` enqueues [`BusMessage::End`] to every subscriber
//! before clearing them, so shutdown ordering is deterministic: a consumer
//! sees every event published before `end()` and then exactly one `End`.
//!
//! Delivery is at-least-once; consumers must be idempotent. The bus is for
//! distribution only, the event store stays the source of truth.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

/// Identifier of one subscription on one bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage<M> {
    Event(M),
    /// The bus was ended; nothing follows on this subscription.
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("event bus is closed")]
    Closed,
}

/// A subscription to an event bus.
///
/// ```ignore
/// let mut subscription = bus.subscribe();
/// while let Some(message) = subscription.recv().await {
///     match message {
///         BusMessage::Event(event) => process(event).await?,
///         BusMessage::End => break,
///     }
/// }
/// ```
///
/// `recv` returning `None` means the subscription was revoked (or the bus dropped).
#[derive(Debug)]
pub struct Subscription<M> {
    id: SubscriptionId,
    receiver: UnboundedReceiver<BusMessage<M>>,
}

impl<M> Subscription<M> {
    pub fn new(id: SubscriptionId, receiver: UnboundedReceiver<BusMessage<M>>) -> Self {
        Self { id, receiver }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next message.
    pub async fn recv(&mut self) -> Option<BusMessage<M>> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<BusMessage<M>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block the current thread until the next message. Must not be called
    /// from inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<BusMessage<M>> {
        self.receiver.blocking_recv()
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// Broadcast semantics: each subscriber gets a copy of every message published
/// while it is subscribed. `Send + Sync` so one bus can be shared by publishers
/// on different tasks.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;

    /// Revoke a subscription. Returns `false` when it was not active.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// (Re)open the bus for publishing.
    fn begin(&self);

    /// Signal end of stream to every subscriber, then drop all subscriptions and close the bus.
    fn end(&self);
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        (**self).unsubscribe(id)
    }

    fn begin(&self) {
        (**self).begin()
    }

    fn end(&self) {
        (**self).end()
    }
}
