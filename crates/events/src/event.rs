//! Tagged, type-erased domain events.

use std::any::Any;
use std::sync::Arc;

use buildup_core::TypeKey;

use crate::projection::ProjectionType;

/// How an event type affects the projections it is applied to.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Regular transition; the apply method produces the full next state.
    #[default]
    Overwrite,
    /// Partial update marker for callers. The fold does not treat it specially.
    Patch,
    /// Resets every projection it is folded into to its zero value.
    Delete,
}

/// A domain event.
///
/// Events are plain immutable values. The associated items replace
/// declaration-by-annotation: the kind marks delete/patch events and
/// [`Event::creates`] names projections that this event brings into existence.
pub trait Event: Any + core::fmt::Debug + Send + Sync {
    const KIND: EventKind = EventKind::Overwrite;

    /// Projection types that should be materialized when this event is seen.
    fn creates() -> Vec<ProjectionType> {
        Vec::new()
    }
}

/// Object-safe view over any [`Event`].
trait ErasedEvent: core::fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn type_key(&self) -> TypeKey;
    fn kind(&self) -> EventKind;
    fn creates(&self) -> Vec<ProjectionType>;
}

impl<E: Event> ErasedEvent for E {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_key(&self) -> TypeKey {
        TypeKey::of::<E>()
    }

    fn kind(&self) -> EventKind {
        E::KIND
    }

    fn creates(&self) -> Vec<ProjectionType> {
        E::creates()
    }
}

/// An event value tagged with its type key. Cloning is cheap (shared payload).
#[derive(Clone)]
pub struct EventData {
    inner: Arc<dyn ErasedEvent>,
}

impl EventData {
    pub fn new<E: Event>(event: E) -> Self {
        Self {
            inner: Arc::new(event),
        }
    }

    pub fn type_key(&self) -> TypeKey {
        self.inner.type_key()
    }

    pub fn kind(&self) -> EventKind {
        self.inner.kind()
    }

    pub fn is_delete(&self) -> bool {
        self.kind() == EventKind::Delete
    }

    pub fn creates(&self) -> Vec<ProjectionType> {
        self.inner.creates()
    }

    pub fn is<E: Event>(&self) -> bool {
        self.inner.as_any().is::<E>()
    }

    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.inner.as_any().downcast_ref::<E>()
    }
}

impl<E: Event> From<E> for EventData {
    fn from(event: E) -> Self {
        Self::new(event)
    }
}

impl core::fmt::Debug for EventData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&*self.inner, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone)]
    struct Ledger;

    #[derive(Debug, PartialEq)]
    struct Deposited {
        amount: i64,
    }
    impl Event for Deposited {}

    #[derive(Debug)]
    struct Closed;
    impl Event for Closed {
        const KIND: EventKind = EventKind::Delete;
    }

    #[derive(Debug)]
    struct Opened;
    impl Event for Opened {
        fn creates() -> Vec<ProjectionType> {
            vec![ProjectionType::of::<Ledger>()]
        }
    }

    #[test]
    fn carries_type_key_and_payload() {
        let data = EventData::from(Deposited { amount: 7 });
        assert_eq!(data.type_key(), TypeKey::of::<Deposited>());
        assert!(data.is::<Deposited>());
        assert_eq!(data.downcast_ref::<Deposited>(), Some(&Deposited { amount: 7 }));
        assert!(data.downcast_ref::<Closed>().is_none());
        assert_eq!(format!("{data:?}"), "Deposited { amount: 7 }");
    }

    #[test]
    fn kind_and_creation_metadata_come_from_the_type() {
        assert_eq!(EventData::new(Deposited { amount: 1 }).kind(), EventKind::Overwrite);
        assert!(EventData::new(Closed).is_delete());

        let creates = EventData::new(Opened).creates();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].key(), TypeKey::of::<Ledger>());
        assert!(EventData::new(Closed).creates().is_empty());
    }
}
