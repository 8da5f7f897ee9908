//! Event and projection model, apply registry, transform graph and the
//! projection engine.
//!
//! Everything in this crate is synchronous and free of I/O; storage and
//! ingestion live in `buildup-infra`.

pub mod apply;
pub mod bus;
pub mod declaration;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod orchestrator;
pub mod projection;
pub mod projector;
pub mod snapshot;
pub mod transform;

pub use apply::{ApplyMethod, ApplyOptions, ApplyRegistry};
pub use bus::{BusError, BusMessage, EventBus, Subscription, SubscriptionId};
pub use declaration::ProjectionDeclaration;
pub use envelope::EventEnvelope;
pub use event::{Event, EventData, EventKind};
pub use in_memory_bus::InMemoryEventBus;
pub use projection::{AnyProjection, Projection, ProjectionType};
pub use projector::{DeclarationBuilder, Projector, ProjectorBuilder};
pub use snapshot::{INITIAL_SNAPSHOT_VERSION, Snapshot};
pub use transform::{PathSearch, ResolvedTransform, TransformGraph};
