//! Projection declarations: which events a projection applies and which
//! event brings it into existence.

use buildup_core::TypeKey;

use crate::projection::ProjectionType;

#[derive(Debug, Clone)]
pub struct ProjectionDeclaration {
    projection_type: ProjectionType,
    created_by: Option<TypeKey>,
    apply_events: Vec<TypeKey>,
}

impl ProjectionDeclaration {
    pub fn new(projection_type: ProjectionType) -> Self {
        Self {
            projection_type,
            created_by: None,
            apply_events: Vec::new(),
        }
    }

    pub fn projection_type(&self) -> ProjectionType {
        self.projection_type
    }

    /// Event type whose presence in a batch materializes this projection.
    pub fn created_by(&self) -> Option<TypeKey> {
        self.created_by
    }

    pub fn apply_events(&self) -> &[TypeKey] {
        &self.apply_events
    }

    pub fn is_created_by(&self, event_type: TypeKey) -> bool {
        self.created_by == Some(event_type)
    }

    pub(crate) fn set_created_by(&mut self, event_type: TypeKey) {
        self.created_by = Some(event_type);
    }

    pub(crate) fn add_apply_event(&mut self, event_type: TypeKey) {
        if !self.apply_events.contains(&event_type) {
            self.apply_events.push(event_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone)]
    struct Account;

    struct Opened;
    struct Renamed;

    #[test]
    fn apply_events_are_deduplicated_in_order() {
        let mut decl = ProjectionDeclaration::new(ProjectionType::of::<Account>());
        decl.add_apply_event(TypeKey::of::<Renamed>());
        decl.add_apply_event(TypeKey::of::<Opened>());
        decl.add_apply_event(TypeKey::of::<Renamed>());

        assert_eq!(
            decl.apply_events(),
            &[TypeKey::of::<Renamed>(), TypeKey::of::<Opened>()]
        );
    }

    #[test]
    fn created_by_is_last_write_wins() {
        let mut decl = ProjectionDeclaration::new(ProjectionType::of::<Account>());
        assert!(decl.created_by().is_none());

        decl.set_created_by(TypeKey::of::<Renamed>());
        decl.set_created_by(TypeKey::of::<Opened>());
        assert!(decl.is_created_by(TypeKey::of::<Opened>()));
        assert!(!decl.is_created_by(TypeKey::of::<Renamed>()));
    }
}
