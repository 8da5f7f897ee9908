//! Error taxonomy.
//!
//! Configuration and projection errors surface synchronously to the caller of
//! the engine; storage errors come from collaborators and are propagated
//! unchanged unless a caller explicitly retries them.

use thiserror::Error;

use crate::{StreamId, TypeKey};

/// Result type used by the projection engine.
pub type BuildUpResult<T> = Result<T, BuildUpError>;

/// Malformed registration, detected while the engine is being configured.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A transform maps an event type onto itself.
    #[error("transform from {0} to itself")]
    SelfTransform(TypeKey),

    /// A projection was declared but nothing can ever be applied to it.
    #[error("projection {0} is declared but has no apply methods")]
    EmptyProjection(TypeKey),

    /// A registered function was handed a value of a different type than it was registered for.
    #[error("apply method for ({projection_type}, {event_type}) received a value of the wrong type")]
    TypeMismatch {
        projection_type: TypeKey,
        event_type: TypeKey,
    },
}

/// Collaborator I/O failure (event store, snapshot store).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("stream not found: {0}")]
    StreamNotFound(StreamId),

    /// Appended event does not advance the stream version.
    #[error("version conflict on stream {stream_id}: last stored version is {last}, got {found}")]
    VersionConflict {
        stream_id: StreamId,
        last: u64,
        found: u64,
    },

    /// A write was rejected because the stored revision moved.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// Backend returned data that contradicts itself (e.g. page totals).
    #[error("inconsistent storage state: {0}")]
    Inconsistent(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn concurrency(msg: impl Into<String>) -> Self {
        Self::Concurrency(msg.into())
    }

    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::Inconsistent(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency(_))
    }
}

/// Top-level error of the projection toolkit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildUpError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// No chain of transforms leads from `event_type` to an event the projection can apply.
    #[error("no transform path from {event_type} to an event applicable to {projection_type}")]
    NoTransformPath {
        projection_type: TypeKey,
        event_type: TypeKey,
    },

    /// Transform traversal came back to `at` while resolving `event_type`.
    #[error("transform cycle through {at} while resolving {event_type} for {projection_type}")]
    CycleDetected {
        projection_type: TypeKey,
        event_type: TypeKey,
        at: TypeKey,
    },

    #[error(transparent)]
    Storage(StorageError),

    #[error("stream not found: {0}")]
    StreamNotFound(StreamId),
}

impl From<StorageError> for BuildUpError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::StreamNotFound(id) => Self::StreamNotFound(id),
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Opened;
    struct Tally;

    #[test]
    fn stream_not_found_is_lifted_out_of_storage() {
        let id = StreamId::new();
        let err = BuildUpError::from(StorageError::StreamNotFound(id));
        assert_eq!(err, BuildUpError::StreamNotFound(id));

        let err = BuildUpError::from(StorageError::backend("disk full"));
        assert!(matches!(err, BuildUpError::Storage(StorageError::Backend(_))));
        assert_eq!(err.to_string(), "storage backend error: disk full");
    }

    #[test]
    fn messages_use_short_type_names() {
        let err = BuildUpError::NoTransformPath {
            projection_type: TypeKey::of::<Tally>(),
            event_type: TypeKey::of::<Opened>(),
        };
        assert_eq!(
            err.to_string(),
            "no transform path from Opened to an event applicable to Tally"
        );

        let err: BuildUpError = ConfigurationError::SelfTransform(TypeKey::of::<Opened>()).into();
        assert_eq!(err.to_string(), "transform from Opened to itself");
    }

    // Errors cross task boundaries in the ingestion pipeline.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<BuildUpError>();
            assert_send_sync::<StorageError>();
        }
    };
}
