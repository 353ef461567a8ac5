use async_trait::async_trait;

use crate::{
    EntityId, EventEnvelope, EventQuery, EventStoreError, Result, Snapshot, Version,
};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected version of the entity for optimistic concurrency control.
    /// If None, no version check is performed (use with caution).
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the entity to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the entity to have no events yet.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// Core trait for event store implementations.
///
/// An event store is responsible for persisting and retrieving events.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events to the store.
    ///
    /// Events are appended atomically - either all succeed or none do. The
    /// store assigns each event its global offset. If
    /// `options.expected_version` is set, the operation fails with
    /// `ConcurrencyConflict` when the current version doesn't match.
    ///
    /// Returns the new version of the entity after appending.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Retrieves all events for a specific entity, oldest first.
    async fn get_events_for_entity(&self, entity_id: &EntityId) -> Result<Vec<EventEnvelope>>;

    /// Retrieves all events for an entity starting from a specific version.
    ///
    /// Useful when replaying from a snapshot.
    async fn get_events_for_entity_from_version(
        &self,
        entity_id: &EntityId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// Retrieves events matching a query, ordered by global offset.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    /// Gets the current version of an entity.
    ///
    /// Returns None if the entity has no events.
    async fn get_entity_version(&self, entity_id: &EntityId) -> Result<Option<Version>>;

    /// Saves a snapshot of an entity's state.
    ///
    /// If a snapshot already exists for this entity, it is replaced.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Retrieves the latest snapshot for an entity.
    async fn get_snapshot(&self, entity_id: &EntityId) -> Result<Option<Snapshot>>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event to the store.
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    /// Checks if an entity has any events.
    async fn entity_exists(&self, entity_id: &EntityId) -> Result<bool> {
        Ok(self.get_entity_version(entity_id).await?.is_some())
    }

    /// Loads an entity's events, optionally starting from a snapshot.
    ///
    /// If a snapshot exists, returns the snapshot and the events after it.
    /// Otherwise, returns None and all events.
    async fn load_entity(
        &self,
        entity_id: &EntityId,
    ) -> Result<(Option<Snapshot>, Vec<EventEnvelope>)> {
        if let Some(snapshot) = self.get_snapshot(entity_id).await? {
            let events = self
                .get_events_for_entity_from_version(entity_id, snapshot.version.next())
                .await?;
            Ok((Some(snapshot), events))
        } else {
            let events = self.get_events_for_entity(entity_id).await?;
            Ok((None, events))
        }
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates a batch before appending.
///
/// The batch must be non-empty, target a single entity, and carry
/// contiguous versions.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "Cannot append empty event list".to_string(),
        ));
    };

    for event in events.iter().skip(1) {
        if event.entity_id != first.entity_id {
            return Err(EventStoreError::InvalidAppend(
                "All events must be for the same entity".to_string(),
            ));
        }
        if event.entity_type != first.entity_type {
            return Err(EventStoreError::InvalidAppend(
                "All events must have the same entity type".to_string(),
            ));
        }
    }

    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "Event versions must be sequential. Expected {}, got {}",
                expected_version, event.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(entity_id: &str, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .entity_id(entity_id)
            .entity_type("Greeting")
            .event_type("GreetingMessageChanged")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
    }

    #[test]
    fn empty_batch_is_invalid() {
        assert!(matches!(
            validate_events_for_append(&[]),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn mixed_entities_are_invalid() {
        let events = vec![envelope("alice", 1), envelope("bob", 2)];
        assert!(validate_events_for_append(&events).is_err());
    }

    #[test]
    fn version_gap_is_invalid() {
        let events = vec![envelope("alice", 1), envelope("alice", 3)];
        assert!(validate_events_for_append(&events).is_err());
    }

    #[test]
    fn contiguous_batch_is_valid() {
        let events = vec![envelope("alice", 4), envelope("alice", 5)];
        assert!(validate_events_for_append(&events).is_ok());
    }
}
