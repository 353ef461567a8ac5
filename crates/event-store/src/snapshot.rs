use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntityId, Version};

/// A snapshot of an entity's state at a specific version.
///
/// Reloading starts from the latest snapshot and replays only the events
/// recorded after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The entity this snapshot belongs to.
    pub entity_id: EntityId,

    /// The kind of entity (e.g., "Greeting").
    pub entity_type: String,

    /// The version of the entity at the time of the snapshot.
    pub version: Version,

    /// When the snapshot was created.
    pub timestamp: DateTime<Utc>,

    /// The serialized entity state.
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Creates a new snapshot.
    pub fn new(
        entity_id: impl Into<EntityId>,
        entity_type: impl Into<String>,
        version: Version,
        state: serde_json::Value,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            version,
            timestamp: Utc::now(),
            state,
        }
    }

    /// Creates a snapshot from a serializable state.
    pub fn from_state<T: Serialize>(
        entity_id: impl Into<EntityId>,
        entity_type: impl Into<String>,
        version: Version,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            entity_id,
            entity_type,
            version,
            serde_json::to_value(state)?,
        ))
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestState {
        message: String,
    }

    #[test]
    fn snapshot_new() {
        let state = serde_json::json!({"message": "Hi"});

        let snapshot = Snapshot::new("alice", "Greeting", Version::new(5), state.clone());

        assert_eq!(snapshot.entity_id, EntityId::from("alice"));
        assert_eq!(snapshot.entity_type, "Greeting");
        assert_eq!(snapshot.version, Version::new(5));
        assert_eq!(snapshot.state, state);
    }

    #[test]
    fn snapshot_from_state_and_into_state() {
        let original = TestState {
            message: "Howdy".to_string(),
        };

        let snapshot = Snapshot::from_state("alice", "Greeting", Version::new(5), &original).unwrap();

        let restored: TestState = snapshot.into_state().unwrap();
        assert_eq!(restored, original);
    }
}
