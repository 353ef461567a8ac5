//! Domain error types.

use std::time::Duration;

use common::EntityId;
use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The append did not complete within the persist timeout.
    #[error("Persisting events for entity {entity_id} timed out after {timeout:?}")]
    PersistTimeout {
        entity_id: EntityId,
        timeout: Duration,
    },

    /// The entity stopped without replying (persistence failure or a
    /// payload that could not be replayed).
    #[error("Entity {entity_id} stopped without replying")]
    NoReply { entity_id: EntityId },

    /// No reply arrived within the ask timeout.
    #[error("Ask to entity {entity_id} timed out after {timeout:?}")]
    AskTimeout {
        entity_id: EntityId,
        timeout: Duration,
    },

    /// The entity's mailbox is closed and could not be reopened.
    #[error("Entity {entity_id} is unavailable")]
    EntityUnavailable { entity_id: EntityId },
}
