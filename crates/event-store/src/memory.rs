use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EntityId, EventEnvelope, EventQuery, EventStoreError, Offset, Result, Snapshot, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

/// In-memory event store implementation.
///
/// Events live in a single vector in append order, so the vector index
/// doubles as the global offset (offset = index + 1). Used by tests and by
/// the API server when no database is configured.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
    snapshots: Arc<RwLock<HashMap<EntityId, Snapshot>>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Clears all events and snapshots.
    pub async fn clear(&self) {
        self.events.write().await.clear();
        self.snapshots.write().await.clear();
    }

    fn matches(query: &EventQuery, e: &EventEnvelope) -> bool {
        if let Some(ref id) = query.entity_id
            && &e.entity_id != id
        {
            return false;
        }
        if let Some(ref tag) = query.tag
            && !e.has_tag(tag)
        {
            return false;
        }
        if let Some(from) = query.from_offset
            && e.offset < from
        {
            return false;
        }
        true
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let first_event = &events[0];
        let entity_id = first_event.entity_id.clone();

        let mut store = self.events.write().await;

        let current_version = store
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                entity_id,
                expected,
                actual: current_version,
            });
        }

        // Unique (entity_id, version) constraint
        if first_event.version <= current_version {
            return Err(EventStoreError::ConcurrencyConflict {
                entity_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        let count = events.len();
        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial());

        let mut next_offset = Offset::new(store.len() as i64 + 1);
        for mut event in events {
            event.offset = next_offset;
            next_offset = next_offset.next();
            store.push(event);
        }

        tracing::debug!(%entity_id, version = %last_version, count, "events appended");
        metrics::counter!("event_store_events_appended_total").increment(count as u64);

        Ok(last_version)
    }

    async fn get_events_for_entity(&self, entity_id: &EntityId) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| &e.entity_id == entity_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn get_events_for_entity_from_version(
        &self,
        entity_id: &EntityId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| &e.entity_id == entity_id && e.version >= from_version)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;

        // The vector is already in offset order; skip straight to the
        // starting offset instead of scanning from the front.
        let start = query
            .from_offset
            .map(|o| o.as_i64().saturating_sub(1).max(0) as usize)
            .unwrap_or(0);

        let matching = store
            .iter()
            .skip(start)
            .filter(|e| Self::matches(&query, e))
            .cloned();

        let events = match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        };

        Ok(events)
    }

    async fn get_entity_version(&self, entity_id: &EntityId) -> Result<Option<Version>> {
        let store = self.events.read().await;
        let version = store
            .iter()
            .filter(|e| &e.entity_id == entity_id)
            .map(|e| e.version)
            .max();
        Ok(version)
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.entity_id.clone(), snapshot);
        Ok(())
    }

    async fn get_snapshot(&self, entity_id: &EntityId) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(entity_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_event(entity_id: &str, version: Version, tag: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .entity_id(entity_id)
            .entity_type("Greeting")
            .event_type("GreetingMessageChanged")
            .tag(tag)
            .version(version)
            .payload_raw(serde_json::json!({"message": "Hi"}))
            .build()
    }

    #[tokio::test]
    async fn append_single_event() {
        let store = InMemoryEventStore::new();
        let entity_id = EntityId::from("alice");
        let event = create_test_event("alice", Version::first(), "GreetingEvent");

        let result = store.append(vec![event], AppendOptions::expect_new()).await;
        assert_eq!(result.unwrap(), Version::first());

        let events = store.get_events_for_entity(&entity_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].offset, Offset::new(1));
    }

    #[tokio::test]
    async fn append_assigns_increasing_offsets_across_entities() {
        let store = InMemoryEventStore::new();

        store
            .append(
                vec![
                    create_test_event("alice", Version::new(1), "GreetingEvent"),
                    create_test_event("alice", Version::new(2), "GreetingEvent"),
                ],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event("bob", Version::new(1), "GreetingEvent")],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        let all = store
            .query_events(EventQuery::for_tag("GreetingEvent"))
            .await
            .unwrap();
        let offsets: Vec<i64> = all.iter().map(|e| e.offset.as_i64()).collect();
        assert_eq!(offsets, vec![1, 2, 3]);
        assert_eq!(all[2].entity_id, EntityId::from("bob"));
    }

    #[tokio::test]
    async fn concurrency_conflict_on_wrong_version() {
        let store = InMemoryEventStore::new();

        let event1 = create_test_event("alice", Version::first(), "GreetingEvent");
        store
            .append(vec![event1], AppendOptions::expect_new())
            .await
            .unwrap();

        let event2 = create_test_event("alice", Version::new(2), "GreetingEvent");
        let result = store
            .append(vec![event2], AppendOptions::expect_version(Version::initial()))
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { .. })
        ));
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_version_without_expectation_conflicts() {
        let store = InMemoryEventStore::new();

        store
            .append(
                vec![create_test_event("alice", Version::first(), "GreetingEvent")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        let result = store
            .append(
                vec![create_test_event("alice", Version::first(), "GreetingEvent")],
                AppendOptions::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn empty_append_is_rejected() {
        let store = InMemoryEventStore::new();
        let result = store.append(vec![], AppendOptions::new()).await;
        assert!(matches!(result, Err(EventStoreError::InvalidAppend(_))));
    }

    #[tokio::test]
    async fn get_events_from_version() {
        let store = InMemoryEventStore::new();
        let entity_id = EntityId::from("alice");

        let events = vec![
            create_test_event("alice", Version::new(1), "GreetingEvent"),
            create_test_event("alice", Version::new(2), "GreetingEvent"),
            create_test_event("alice", Version::new(3), "GreetingEvent"),
        ];
        store.append(events, AppendOptions::new()).await.unwrap();

        let from_v2 = store
            .get_events_for_entity_from_version(&entity_id, Version::new(2))
            .await
            .unwrap();
        assert_eq!(from_v2.len(), 2);
        assert_eq!(from_v2[0].version, Version::new(2));
        assert_eq!(from_v2[1].version, Version::new(3));
    }

    #[tokio::test]
    async fn query_by_tag_from_offset_with_limit() {
        let store = InMemoryEventStore::new();

        store
            .append(
                vec![create_test_event("alice", Version::first(), "GreetingEvent")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event("bob", Version::first(), "OtherEvent")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![
                    create_test_event("carol", Version::new(1), "GreetingEvent"),
                    create_test_event("carol", Version::new(2), "GreetingEvent"),
                ],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        let tagged = store
            .query_events(EventQuery::for_tag("GreetingEvent"))
            .await
            .unwrap();
        assert_eq!(tagged.len(), 3);

        let from_two = store
            .query_events(EventQuery::for_tag("GreetingEvent").from_offset(Offset::new(2)))
            .await
            .unwrap();
        let offsets: Vec<i64> = from_two.iter().map(|e| e.offset.as_i64()).collect();
        assert_eq!(offsets, vec![3, 4]);

        let limited = store
            .query_events(
                EventQuery::for_tag("GreetingEvent")
                    .from_offset(Offset::BEGINNING)
                    .limit(2),
            )
            .await
            .unwrap();
        let offsets: Vec<i64> = limited.iter().map(|e| e.offset.as_i64()).collect();
        assert_eq!(offsets, vec![1, 3]);
    }

    #[tokio::test]
    async fn query_past_the_end_is_empty() {
        let store = InMemoryEventStore::new();
        store
            .append(
                vec![create_test_event("alice", Version::first(), "GreetingEvent")],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        let events = store
            .query_events(EventQuery::for_tag("GreetingEvent").from_offset(Offset::new(2)))
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn snapshot_save_and_retrieve() {
        let store = InMemoryEventStore::new();
        let entity_id = EntityId::from("alice");

        let snapshot = Snapshot::new(
            "alice",
            "Greeting",
            Version::new(5),
            serde_json::json!({"message": "saved"}),
        );

        store.save_snapshot(snapshot).await.unwrap();

        let retrieved = store.get_snapshot(&entity_id).await.unwrap().unwrap();
        assert_eq!(retrieved.entity_id, entity_id);
        assert_eq!(retrieved.version, Version::new(5));
    }

    #[tokio::test]
    async fn snapshot_not_found() {
        let store = InMemoryEventStore::new();
        let result = store.get_snapshot(&EntityId::from("nobody")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn get_entity_version() {
        let store = InMemoryEventStore::new();
        let entity_id = EntityId::from("alice");

        let version = store.get_entity_version(&entity_id).await.unwrap();
        assert!(version.is_none());

        let events = vec![
            create_test_event("alice", Version::new(1), "GreetingEvent"),
            create_test_event("alice", Version::new(2), "GreetingEvent"),
        ];
        store.append(events, AppendOptions::new()).await.unwrap();

        let version = store.get_entity_version(&entity_id).await.unwrap();
        assert_eq!(version, Some(Version::new(2)));
    }
}
