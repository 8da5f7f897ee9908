//! Projection (read model) representation.

use std::any::Any;

use buildup_core::TypeKey;

/// A read model built by folding events.
///
/// Any `Default + Clone + Debug` value that can cross threads qualifies; the
/// `Default` value is the projection's zero state.
pub trait Projection: Default + Clone + core::fmt::Debug + Send + Sync + 'static {}

impl<T> Projection for T where T: Default + Clone + core::fmt::Debug + Send + Sync + 'static {}

/// Object-safe projection, used where the concrete type is only known by key
/// (snapshots, batch materialization).
pub trait AnyProjection: core::fmt::Debug + Send + Sync {
    fn type_key(&self) -> TypeKey;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
    fn clone_boxed(&self) -> Box<dyn AnyProjection>;
    /// Fresh zero value of the same projection type.
    fn zeroed(&self) -> Box<dyn AnyProjection>;
    /// Replace the value with its zero state.
    fn reset(&mut self);
}

impl<P: Projection> AnyProjection for P {
    fn type_key(&self) -> TypeKey {
        TypeKey::of::<P>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }

    fn clone_boxed(&self) -> Box<dyn AnyProjection> {
        Box::new(self.clone())
    }

    fn zeroed(&self) -> Box<dyn AnyProjection> {
        Box::new(P::default())
    }

    fn reset(&mut self) {
        *self = P::default();
    }
}

impl Clone for Box<dyn AnyProjection> {
    fn clone(&self) -> Self {
        self.as_ref().clone_boxed()
    }
}

/// Projection type handle: its key plus a constructor for the zero value.
#[derive(Debug, Copy, Clone)]
pub struct ProjectionType {
    key: TypeKey,
    zero: fn() -> Box<dyn AnyProjection>,
}

fn zero_of<P: Projection>() -> Box<dyn AnyProjection> {
    Box::new(P::default())
}

impl ProjectionType {
    pub fn of<P: Projection>() -> Self {
        Self {
            key: TypeKey::of::<P>(),
            zero: zero_of::<P>,
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn zero(&self) -> Box<dyn AnyProjection> {
        (self.zero)()
    }
}

impl PartialEq for ProjectionType {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ProjectionType {}

impl core::fmt::Display for ProjectionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.key, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Counter {
        value: i64,
    }

    #[test]
    fn zero_builds_default_value() {
        let pt = ProjectionType::of::<Counter>();
        let zero = pt.zero();
        assert_eq!(zero.type_key(), TypeKey::of::<Counter>());
        assert_eq!(zero.as_any().downcast_ref::<Counter>(), Some(&Counter::default()));
    }

    #[test]
    fn boxed_projection_clones_and_zeroes() {
        let boxed: Box<dyn AnyProjection> = Box::new(Counter { value: 5 });
        let copy = boxed.clone();
        assert_eq!(copy.as_any().downcast_ref::<Counter>(), Some(&Counter { value: 5 }));

        let zero = boxed.zeroed();
        assert_eq!(zero.as_any().downcast_ref::<Counter>(), Some(&Counter { value: 0 }));

        let mut reset = copy;
        reset.reset();
        assert_eq!(reset.as_any().downcast_ref::<Counter>(), Some(&Counter::default()));

        let back = boxed.into_any().downcast::<Counter>().unwrap();
        assert_eq!(*back, Counter { value: 5 });
    }
}
