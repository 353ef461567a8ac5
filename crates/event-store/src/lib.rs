//! Durable event log for the greeting service.
//!
//! The store is an append-only log with two orderings:
//! - per entity, by [`Version`] (contiguous, starting at 1)
//! - globally, by [`Offset`] (assigned at append time, strictly increasing)
//!
//! Consumers that want "every event of a family" query by tag and offset
//! through [`EventQuery`] without knowing any entity ids.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod snapshot;
pub mod store;

pub use common::EntityId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Offset, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventQuery;
pub use snapshot::Snapshot;
pub use store::{AppendOptions, EventStore, EventStoreExt};
