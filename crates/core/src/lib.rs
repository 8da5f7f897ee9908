//! `buildup-core` — primitives shared by the projection engine and its collaborators.
//!
//! This crate has no IO and no async: identifiers, type keys, optimistic
//! concurrency expectations and the error taxonomy.

pub mod error;
pub mod id;
pub mod type_key;
pub mod version;

pub use error::{BuildUpError, BuildUpResult, ConfigurationError, StorageError};
pub use id::StreamId;
pub use type_key::TypeKey;
pub use version::ExpectedVersion;
