//! Projection engine.
//!
//! A [`Projector`] is configured once through a [`ProjectorBuilder`] and is
//! read-only afterwards, except for composite transforms cached by the
//! transform graph. Folding is synchronous and never touches I/O.

use std::marker::PhantomData;

use tracing::{debug, trace};

use buildup_core::{BuildUpError, BuildUpResult, ConfigurationError, TypeKey};

use crate::apply::{ApplyMethod, ApplyOptions, ApplyRegistry};
use crate::declaration::ProjectionDeclaration;
use crate::event::{Event, EventData};
use crate::projection::{AnyProjection, Projection, ProjectionType};
use crate::snapshot::Snapshot;
use crate::transform::TransformGraph;

/// Configuration surface for a [`Projector`].
#[derive(Debug, Default)]
pub struct ProjectorBuilder {
    registry: ApplyRegistry,
    transforms: TransformGraph,
    declarations: Vec<ProjectionDeclaration>,
}

impl ProjectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transition` as the apply method for `(P, E)`, replacing any previous one.
    pub fn register_apply<P, E, F>(&mut self, transition: F) -> ApplyOptions<'_>
    where
        P: Projection,
        E: Event,
        F: Fn(P, &E) -> P + Send + Sync + 'static,
    {
        ApplyOptions::new(self.registry.register(ApplyMethod::new::<P, E, F>(transition)))
    }

    /// Register a one-hop transform from `Old` to `New`.
    pub fn register_transform<Old, New, F>(
        &mut self,
        transform: F,
    ) -> Result<&mut Self, ConfigurationError>
    where
        Old: Event,
        New: Event,
        F: Fn(&Old) -> New + Send + Sync + 'static,
    {
        self.transforms.register::<Old, New, F>(transform)?;
        Ok(self)
    }

    /// Declare `P`. Declaring it again extends the existing declaration.
    pub fn register_projection<P: Projection>(&mut self) -> DeclarationBuilder<'_, P> {
        self.declaration_mut(ProjectionType::of::<P>());
        DeclarationBuilder {
            builder: self,
            _projection: PhantomData,
        }
    }

    /// Validate declarations and freeze the configuration.
    pub fn build(self) -> Result<Projector, ConfigurationError> {
        if let Some(empty) = self
            .declarations
            .iter()
            .find(|d| !self.registry.is_projectable(d.projection_type().key()))
        {
            return Err(ConfigurationError::EmptyProjection(empty.projection_type().key()));
        }

        debug!(
            apply_methods = self.registry.len(),
            projections = self.declarations.len(),
            "projector configured"
        );

        Ok(Projector {
            registry: self.registry,
            transforms: self.transforms,
            declarations: self.declarations,
        })
    }

    fn declaration_mut(&mut self, projection_type: ProjectionType) -> &mut ProjectionDeclaration {
        let key = projection_type.key();
        match self
            .declarations
            .iter()
            .position(|d| d.projection_type().key() == key)
        {
            Some(index) => &mut self.declarations[index],
            None => {
                self.declarations
                    .push(ProjectionDeclaration::new(projection_type));
                let last = self.declarations.len() - 1;
                &mut self.declarations[last]
            }
        }
    }
}

/// Fluent declaration of one projection type.
pub struct DeclarationBuilder<'a, P> {
    builder: &'a mut ProjectorBuilder,
    _projection: PhantomData<fn() -> P>,
}

impl<P: Projection> DeclarationBuilder<'_, P> {
    pub fn apply<E, F>(self, transition: F) -> Self
    where
        E: Event,
        F: Fn(P, &E) -> P + Send + Sync + 'static,
    {
        self.builder.register_apply::<P, E, F>(transition);
        self.builder
            .declaration_mut(ProjectionType::of::<P>())
            .add_apply_event(TypeKey::of::<E>());
        self
    }

    /// `E` resets this projection to its zero value.
    pub fn deleted_by<E: Event>(self) -> Self {
        self.builder
            .register_apply::<P, E, _>(|_: P, _: &E| P::default())
            .delete();
        self.builder
            .declaration_mut(ProjectionType::of::<P>())
            .add_apply_event(TypeKey::of::<E>());
        self
    }

    /// Materialize this projection whenever `E` appears in a batch.
    pub fn created_by<E: Event>(self) -> Self {
        self.builder
            .declaration_mut(ProjectionType::of::<P>())
            .set_created_by(TypeKey::of::<E>());
        self
    }
}

/// Folds events into projections.
#[derive(Debug)]
pub struct Projector {
    pub(crate) registry: ApplyRegistry,
    pub(crate) transforms: TransformGraph,
    pub(crate) declarations: Vec<ProjectionDeclaration>,
}

impl Projector {
    pub fn builder() -> ProjectorBuilder {
        ProjectorBuilder::new()
    }

    /// Run `configure` against a fresh builder and build the projector.
    pub fn configure<F>(configure: F) -> Result<Self, ConfigurationError>
    where
        F: FnOnce(&mut ProjectorBuilder) -> Result<(), ConfigurationError>,
    {
        let mut builder = ProjectorBuilder::new();
        configure(&mut builder)?;
        builder.build()
    }

    /// Fold `events` into `instance`.
    ///
    /// Unprojectable types come back unchanged. A delete event anywhere in the
    /// batch yields the zero value. Events with neither an apply method nor a
    /// transform path are skipped.
    pub fn project<P: Projection>(&self, mut instance: P, events: &[EventData]) -> BuildUpResult<P> {
        self.fold(&mut instance, events)?;
        Ok(instance)
    }

    /// Fold `events` into the zero value of `P`.
    pub fn project_new<P: Projection>(&self, events: &[EventData]) -> BuildUpResult<P> {
        self.project(P::default(), events)
    }

    /// Fold `events` into the snapshot's data and stamp it with `version`.
    pub fn project_snapshot(
        &self,
        mut snapshot: Snapshot,
        events: &[EventData],
        version: u64,
    ) -> BuildUpResult<Snapshot> {
        self.fold(snapshot.data_mut(), events)?;
        Ok(snapshot.with_version(version))
    }

    /// Fold into a type-erased projection in place.
    pub fn fold(&self, projection: &mut dyn AnyProjection, events: &[EventData]) -> BuildUpResult<()> {
        let projection_type = projection.type_key();
        if !self.registry.is_projectable(projection_type) {
            trace!(%projection_type, "projection has no apply methods; unchanged");
            return Ok(());
        }
        self.fold_batch(projection_type, projection, events)?;
        Ok(())
    }

    pub fn is_projectable(&self, projection_type: TypeKey) -> bool {
        self.registry.is_projectable(projection_type)
    }

    pub fn is_applicable(&self, projection_type: TypeKey, event_type: TypeKey) -> bool {
        self.registry.is_applicable(projection_type, event_type)
    }

    pub fn apply_methods(&self) -> impl Iterator<Item = &ApplyMethod> {
        self.registry.methods()
    }

    pub fn projections(&self) -> &[ProjectionDeclaration] {
        &self.declarations
    }

    pub fn transforms(&self) -> &TransformGraph {
        &self.transforms
    }

    fn is_delete(&self, projection_type: TypeKey, event: &EventData) -> bool {
        event.is_delete()
            || self
                .registry
                .lookup(projection_type, event.type_key())
                .is_some_and(ApplyMethod::is_delete)
    }

    /// Returns `true` when the batch reset the projection, in which case the
    /// caller must not fold anything further into it.
    fn fold_batch(
        &self,
        projection_type: TypeKey,
        projection: &mut dyn AnyProjection,
        events: &[EventData],
    ) -> BuildUpResult<bool> {
        if let Some(delete) = events.iter().find(|e| self.is_delete(projection_type, e)) {
            debug!(%projection_type, event_type = %delete.type_key(), "delete event in batch; resetting");
            projection.reset();
            return Ok(true);
        }

        for event in events {
            if self.fold_one(projection_type, projection, event)? {
                // A transformed event turned out to be a delete.
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn fold_one(
        &self,
        projection_type: TypeKey,
        projection: &mut dyn AnyProjection,
        event: &EventData,
    ) -> BuildUpResult<bool> {
        let event_type = event.type_key();
        if let Some(method) = self.registry.lookup(projection_type, event_type) {
            method.invoke(projection, event)?;
            return Ok(false);
        }

        if !self.transforms.is_transformable(event_type) {
            trace!(%projection_type, %event_type, "no apply method; skipping");
            return Ok(false);
        }

        let resolved = match self.transforms.resolve(projection_type, event_type, |candidate| {
            self.registry.is_applicable(projection_type, candidate)
        }) {
            Ok(resolved) => resolved,
            Err(BuildUpError::NoTransformPath { .. }) => {
                debug!(%projection_type, %event_type, "no transform path; skipping");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let transformed = resolved.apply(event).ok_or(ConfigurationError::TypeMismatch {
            projection_type,
            event_type,
        })?;
        self.fold_batch(projection_type, projection, std::slice::from_ref(&transformed))
    }
}
