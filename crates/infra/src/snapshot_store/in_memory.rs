use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use buildup_core::{ExpectedVersion, StorageError, StreamId, TypeKey};
use buildup_events::Snapshot;

use super::r#trait::{SnapshotStore, snapshot_revision};

/// In-memory snapshot store keeping every stored snapshot.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    streams: RwLock<HashMap<StreamId, Vec<Snapshot>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every snapshot stored for (`stream_id`, `projection_type`), oldest first.
    pub fn history(
        &self,
        stream_id: StreamId,
        projection_type: TypeKey,
    ) -> Result<Vec<Snapshot>, StorageError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| StorageError::backend("lock poisoned"))?;
        Ok(streams
            .get(&stream_id)
            .map(|all| {
                all.iter()
                    .filter(|s| s.projection_type() == projection_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Highest version per projection type, in first-stored order.
    fn current(history: &[Snapshot]) -> Vec<Snapshot> {
        let mut current: Vec<Snapshot> = Vec::new();
        for snapshot in history {
            match current
                .iter_mut()
                .find(|s| s.projection_type() == snapshot.projection_type())
            {
                Some(existing) if existing.version() <= snapshot.version() => {
                    *existing = snapshot.clone();
                }
                Some(_) => {}
                None => current.push(snapshot.clone()),
            }
        }
        current
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get_snapshots(&self, stream_id: StreamId) -> Result<Vec<Snapshot>, StorageError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| StorageError::backend("lock poisoned"))?;
        Ok(streams
            .get(&stream_id)
            .map(|history| Self::current(history))
            .unwrap_or_default())
    }

    async fn store_snapshots(
        &self,
        stream_id: StreamId,
        snapshots: Vec<Snapshot>,
        expected: ExpectedVersion,
    ) -> Result<(), StorageError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| StorageError::backend("lock poisoned"))?;

        let history = streams.entry(stream_id).or_default();
        let revision = snapshot_revision(&Self::current(history));
        expected.check(revision)?;

        history.extend(snapshots);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Balance(i64);

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Activity(u32);

    #[tokio::test]
    async fn current_is_highest_version_per_type() {
        let store = InMemorySnapshotStore::new();
        let stream_id = StreamId::new();

        store
            .store_snapshots(
                stream_id,
                vec![Snapshot::of(Balance(1), 1), Snapshot::of(Activity(1), 1)],
                ExpectedVersion::Exact(0),
            )
            .await
            .unwrap();
        store
            .store_snapshots(stream_id, vec![Snapshot::of(Balance(5), 2)], ExpectedVersion::Exact(1))
            .await
            .unwrap();

        let current = store.get_snapshots(stream_id).await.unwrap();
        assert_eq!(current.len(), 2);
        assert_eq!(current[0].downcast_ref::<Balance>(), Some(&Balance(5)));
        assert_eq!(current[1].downcast_ref::<Activity>(), Some(&Activity(1)));

        let history = store.history(stream_id, TypeKey::of::<Balance>()).unwrap();
        assert_eq!(
            history.iter().map(Snapshot::version).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn stale_writer_is_rejected() {
        let store = InMemorySnapshotStore::new();
        let stream_id = StreamId::new();

        store
            .store_snapshots(stream_id, vec![Snapshot::of(Balance(1), 3)], ExpectedVersion::Exact(0))
            .await
            .unwrap();

        let err = store
            .store_snapshots(stream_id, vec![Snapshot::of(Balance(2), 1)], ExpectedVersion::Exact(0))
            .await
            .unwrap_err();
        assert!(err.is_concurrency());

        store
            .store_snapshots(stream_id, vec![Snapshot::of(Balance(9), 4)], ExpectedVersion::Any)
            .await
            .unwrap();
        assert_eq!(store.retrieve_snapshot::<Balance>(stream_id).await.unwrap(), Balance(9));
    }

    #[tokio::test]
    async fn retrieve_defaults_when_absent() {
        let store = InMemorySnapshotStore::new();
        let stream_id = StreamId::new();

        assert!(store.get_snapshots(stream_id).await.unwrap().is_empty());
        assert_eq!(
            store.retrieve_snapshot::<Activity>(stream_id).await.unwrap(),
            Activity::default()
        );
        assert!(
            store
                .get_snapshot(stream_id, TypeKey::of::<Activity>())
                .await
                .unwrap()
                .is_none()
        );
    }
}
