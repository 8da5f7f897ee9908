//! Apply registry: transition functions keyed by (projection type, event type).
//!
//! Registration is generic, so a transition function can only ever be stored
//! under the types it was written for. Inside the registry everything is
//! erased to [`AnyProjection`] / [`EventData`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use buildup_core::{BuildUpResult, ConfigurationError, TypeKey};

use crate::event::{Event, EventData, EventKind};
use crate::projection::{AnyProjection, Projection, ProjectionType};

type ErasedApply = Arc<dyn Fn(&mut dyn AnyProjection, &EventData) -> bool + Send + Sync>;

/// A registered transition function plus its delete/patch flags.
#[derive(Clone)]
pub struct ApplyMethod {
    projection_type: ProjectionType,
    event_type: TypeKey,
    apply: ErasedApply,
    is_delete: bool,
    is_patch: bool,
}

impl ApplyMethod {
    pub fn new<P, E, F>(transition: F) -> Self
    where
        P: Projection,
        E: Event,
        F: Fn(P, &E) -> P + Send + Sync + 'static,
    {
        let apply: ErasedApply = Arc::new(move |projection, event| {
            let (Some(state), Some(event)) = (
                projection.as_any_mut().downcast_mut::<P>(),
                event.downcast_ref::<E>(),
            ) else {
                return false;
            };
            let current = std::mem::take(state);
            *state = transition(current, event);
            true
        });

        Self {
            projection_type: ProjectionType::of::<P>(),
            event_type: TypeKey::of::<E>(),
            apply,
            is_delete: E::KIND == EventKind::Delete,
            is_patch: E::KIND == EventKind::Patch,
        }
    }

    pub fn projection_type(&self) -> TypeKey {
        self.projection_type.key()
    }

    pub fn event_type(&self) -> TypeKey {
        self.event_type
    }

    pub fn is_delete(&self) -> bool {
        self.is_delete
    }

    pub fn is_patch(&self) -> bool {
        self.is_patch
    }

    pub fn requires_overwrite(&self) -> bool {
        !self.is_delete && !self.is_patch
    }

    /// Run the transition against `projection`.
    pub fn invoke(&self, projection: &mut dyn AnyProjection, event: &EventData) -> BuildUpResult<()> {
        if (self.apply)(projection, event) {
            Ok(())
        } else {
            Err(ConfigurationError::TypeMismatch {
                projection_type: self.projection_type.key(),
                event_type: self.event_type,
            }
            .into())
        }
    }
}

impl core::fmt::Debug for ApplyMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApplyMethod")
            .field("projection_type", &self.projection_type.key())
            .field("event_type", &self.event_type)
            .field("is_delete", &self.is_delete)
            .field("is_patch", &self.is_patch)
            .finish()
    }
}

/// Handle returned by registration to set the method's flags.
#[derive(Debug)]
pub struct ApplyOptions<'a> {
    method: &'a mut ApplyMethod,
}

impl<'a> ApplyOptions<'a> {
    pub(crate) fn new(method: &'a mut ApplyMethod) -> Self {
        Self { method }
    }

    /// Mark the event as resetting the projection to its zero value.
    pub fn delete(self) -> Self {
        self.method.is_delete = true;
        self
    }

    pub fn patch(self) -> Self {
        self.method.is_patch = true;
        self
    }

    pub fn method(&self) -> &ApplyMethod {
        self.method
    }
}

/// Transition functions per projection type, then per event type.
#[derive(Debug, Default, Clone)]
pub struct ApplyRegistry {
    methods: HashMap<TypeKey, HashMap<TypeKey, ApplyMethod>>,
    projections: HashMap<TypeKey, ProjectionType>,
}

impl ApplyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the method for its (projection type, event type) pair.
    pub fn register(&mut self, method: ApplyMethod) -> &mut ApplyMethod {
        let projection_type = method.projection_type;
        self.projections.insert(projection_type.key(), projection_type);

        let slot = self.methods.entry(projection_type.key()).or_default();
        match slot.entry(method.event_type) {
            Entry::Occupied(mut existing) => {
                existing.insert(method);
                existing.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(method),
        }
    }

    pub fn lookup(&self, projection_type: TypeKey, event_type: TypeKey) -> Option<&ApplyMethod> {
        self.methods.get(&projection_type)?.get(&event_type)
    }

    pub fn is_applicable(&self, projection_type: TypeKey, event_type: TypeKey) -> bool {
        self.lookup(projection_type, event_type).is_some()
    }

    /// A projection type is projectable once any event type is registered for it.
    pub fn is_projectable(&self, projection_type: TypeKey) -> bool {
        self.methods
            .get(&projection_type)
            .is_some_and(|m| !m.is_empty())
    }

    pub fn projection_type(&self, key: TypeKey) -> Option<ProjectionType> {
        self.projections.get(&key).copied()
    }

    pub fn methods_for(&self, projection_type: TypeKey) -> impl Iterator<Item = &ApplyMethod> {
        self.methods
            .get(&projection_type)
            .into_iter()
            .flat_map(|m| m.values())
    }

    pub fn methods(&self) -> impl Iterator<Item = &ApplyMethod> {
        self.methods.values().flat_map(|m| m.values())
    }

    pub fn len(&self) -> usize {
        self.methods.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
