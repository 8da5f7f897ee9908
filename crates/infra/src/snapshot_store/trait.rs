use async_trait::async_trait;
use std::sync::Arc;

use buildup_core::{ExpectedVersion, StorageError, StreamId, TypeKey};
use buildup_events::{Projection, Snapshot};

/// Revision used for optimistic concurrency: the highest snapshot version, 0 when none.
pub fn snapshot_revision(snapshots: &[Snapshot]) -> u64 {
    snapshots.iter().map(Snapshot::version).max().unwrap_or(0)
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Current snapshots of a stream: the highest version per projection type.
    async fn get_snapshots(&self, stream_id: StreamId) -> Result<Vec<Snapshot>, StorageError>;

    /// Persist `snapshots` for `stream_id` if the stream's revision matches `expected`.
    ///
    /// Fails with [`StorageError::Concurrency`] when another writer got there first.
    async fn store_snapshots(
        &self,
        stream_id: StreamId,
        snapshots: Vec<Snapshot>,
        expected: ExpectedVersion,
    ) -> Result<(), StorageError>;

    async fn get_snapshot(
        &self,
        stream_id: StreamId,
        projection_type: TypeKey,
    ) -> Result<Option<Snapshot>, StorageError> {
        Ok(self
            .get_snapshots(stream_id)
            .await?
            .into_iter()
            .find(|s| s.projection_type() == projection_type))
    }

    /// Typed current projection, or its zero value when no snapshot exists.
    async fn retrieve_snapshot<P: Projection>(&self, stream_id: StreamId) -> Result<P, StorageError>
    where
        Self: Sized,
    {
        let Some(snapshot) = self.get_snapshot(stream_id, TypeKey::of::<P>()).await? else {
            return Ok(P::default());
        };
        snapshot.into_data::<P>().map_err(|s| {
            StorageError::inconsistent(format!(
                "snapshot stored under {} holds another type",
                s.projection_type()
            ))
        })
    }
}

#[async_trait]
impl<S> SnapshotStore for Arc<S>
where
    S: SnapshotStore + ?Sized,
{
    async fn get_snapshots(&self, stream_id: StreamId) -> Result<Vec<Snapshot>, StorageError> {
        (**self).get_snapshots(stream_id).await
    }

    async fn store_snapshots(
        &self,
        stream_id: StreamId,
        snapshots: Vec<Snapshot>,
        expected: ExpectedVersion,
    ) -> Result<(), StorageError> {
        (**self).store_snapshots(stream_id, snapshots, expected).await
    }

    async fn get_snapshot(
        &self,
        stream_id: StreamId,
        projection_type: TypeKey,
    ) -> Result<Option<Snapshot>, StorageError> {
        (**self).get_snapshot(stream_id, projection_type).await
    }
}
