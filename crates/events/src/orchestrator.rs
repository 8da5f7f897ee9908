//! Batch snapshot materialization.

use tracing::debug;

use buildup_core::{BuildUpResult, TypeKey};

use crate::event::EventData;
use crate::projection::ProjectionType;
use crate::projector::Projector;
use crate::snapshot::{INITIAL_SNAPSHOT_VERSION, Snapshot};

impl Projector {
    /// Projection types a batch brings into existence: declarations created by
    /// one of the batch's event types, then per-event creation metadata.
    /// Deduplicated, in first-seen order.
    pub fn created_types(&self, events: &[EventData]) -> Vec<ProjectionType> {
        let event_types: Vec<TypeKey> = events.iter().map(EventData::type_key).collect();

        let declared = self
            .declarations
            .iter()
            .filter(|d| d.created_by().is_some_and(|t| event_types.contains(&t)))
            .map(|d| d.projection_type());
        let metadata = events.iter().flat_map(EventData::creates);

        let mut types: Vec<ProjectionType> = Vec::new();
        for projection_type in declared.chain(metadata) {
            if !types.contains(&projection_type) {
                types.push(projection_type);
            }
        }
        types
    }

    /// Build one snapshot per created projection type by folding the whole batch
    /// into its zero value. Snapshots start at [`INITIAL_SNAPSHOT_VERSION`].
    pub fn get_snapshots(&self, events: &[EventData]) -> BuildUpResult<Vec<Snapshot>> {
        let types = self.created_types(events);
        debug!(events = events.len(), projections = types.len(), "materializing snapshots");

        types
            .into_iter()
            .map(|projection_type| {
                let mut data = projection_type.zero();
                self.fold(data.as_mut(), events)?;
                Ok(Snapshot::new(data, INITIAL_SNAPSHOT_VERSION))
            })
            .collect()
    }
}
