//! Versioned, persisted projection instances.

use buildup_core::TypeKey;

use crate::projection::{AnyProjection, Projection};

/// Version given to snapshots materialized from a batch.
pub const INITIAL_SNAPSHOT_VERSION: u64 = 1;

/// A projection instance at a point in a stream's history.
///
/// Only the highest version per (stream, projection type) is authoritative.
#[derive(Debug, Clone)]
pub struct Snapshot {
    projection_type: TypeKey,
    data: Box<dyn AnyProjection>,
    version: u64,
}

impl Snapshot {
    pub fn new(data: Box<dyn AnyProjection>, version: u64) -> Self {
        Self {
            projection_type: data.type_key(),
            data,
            version,
        }
    }

    pub fn of<P: Projection>(data: P, version: u64) -> Self {
        Self::new(Box::new(data), version)
    }

    pub fn projection_type(&self) -> TypeKey {
        self.projection_type
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn data(&self) -> &dyn AnyProjection {
        self.data.as_ref()
    }

    pub fn data_mut(&mut self) -> &mut dyn AnyProjection {
        self.data.as_mut()
    }

    pub fn into_inner(self) -> (Box<dyn AnyProjection>, u64) {
        (self.data, self.version)
    }

    pub fn downcast_ref<P: Projection>(&self) -> Option<&P> {
        self.data.as_any().downcast_ref::<P>()
    }

    /// Take the typed projection out, or get the snapshot back when the type does not match.
    pub fn into_data<P: Projection>(mut self) -> Result<P, Self> {
        if !self.data.as_any().is::<P>() {
            return Err(self);
        }
        let data = self.data.as_any_mut().downcast_mut::<P>().map(std::mem::take);
        Ok(data.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Balance {
        cents: i64,
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Other;

    #[test]
    fn typed_access() {
        let snapshot = Snapshot::of(Balance { cents: 250 }, 4);
        assert_eq!(snapshot.projection_type(), TypeKey::of::<Balance>());
        assert_eq!(snapshot.version(), 4);
        assert_eq!(snapshot.downcast_ref::<Balance>(), Some(&Balance { cents: 250 }));
        assert!(snapshot.downcast_ref::<Other>().is_none());

        let restamped = snapshot.clone().with_version(9);
        assert_eq!(restamped.version(), 9);
        assert_eq!(restamped.into_data::<Balance>().unwrap(), Balance { cents: 250 });
    }

    #[test]
    fn into_data_with_wrong_type_returns_snapshot() {
        let snapshot = Snapshot::of(Balance { cents: 1 }, 1);
        let back = snapshot.into_data::<Other>().unwrap_err();
        assert_eq!(back.downcast_ref::<Balance>(), Some(&Balance { cents: 1 }));
    }
}
