//! Republishes the change feed to a topic, tracking a committed offset.

use event_store::{EventStore, Offset};
use futures_util::StreamExt;

use crate::{ChangeFeedPublisher, FeedItem, OffsetStore, Result, Topic};

/// Moves greeting events from the store to a topic for one named consumer.
///
/// Each item is published before its offset is committed, so after a crash
/// the last item may be published again but none is skipped.
pub struct TopicProducer<S, O, T> {
    publisher: ChangeFeedPublisher<S>,
    offsets: O,
    topic: T,
    consumer: String,
}

impl<S, O, T> TopicProducer<S, O, T>
where
    S: EventStore + Clone + 'static,
    O: OffsetStore,
    T: Topic,
{
    /// Creates a producer that commits its progress under `consumer`.
    pub fn new(
        publisher: ChangeFeedPublisher<S>,
        offsets: O,
        topic: T,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            offsets,
            topic,
            consumer: consumer.into(),
        }
    }

    /// Returns the consumer name offsets are committed under.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Returns the offset the next read starts from.
    pub async fn start_offset(&self) -> Result<Offset> {
        Ok(self
            .offsets
            .load(&self.consumer)
            .await?
            .map(|last| last.next())
            .unwrap_or(Offset::BEGINNING))
    }

    /// Publishes everything persisted so far and returns how many items
    /// were published.
    #[tracing::instrument(skip(self), fields(consumer = %self.consumer))]
    pub async fn publish_pending(&self) -> Result<usize> {
        let mut from = self.start_offset().await?;
        let mut published = 0;

        loop {
            let envelopes = self.publisher.read_batch(from).await?;
            if envelopes.is_empty() {
                break;
            }
            for envelope in &envelopes {
                let item = FeedItem::try_from(envelope)?;
                from = item.offset.next();
                self.deliver(item).await?;
                published += 1;
            }
        }

        tracing::debug!(published, "caught up");
        Ok(published)
    }

    /// Follows the feed, publishing each item as it is persisted.
    ///
    /// Returns only when the feed yields an error.
    #[tracing::instrument(skip(self), fields(consumer = %self.consumer))]
    pub async fn run(&self) -> Result<()> {
        let start = self.start_offset().await?;
        tracing::info!(%start, "change feed producer started");

        let mut events = self.publisher.events(start);
        while let Some(item) = events.next().await {
            self.deliver(item?).await?;
        }
        Ok(())
    }

    /// Follows the feed for as long as the task runs, restarting after
    /// errors.
    ///
    /// Each restart resumes from the committed offset. The delay before a
    /// restart doubles from `retry_base_delay` up to `retry_max_delay`, and
    /// resets once a run has committed progress.
    pub async fn run_with_retry(&self) {
        let config = self.publisher.config().clone();
        let mut delay = config.retry_base_delay;
        let mut last_start = None;

        loop {
            let start = self.start_offset().await.ok();
            if start.is_some() && start != last_start {
                delay = config.retry_base_delay;
            }
            last_start = start;

            match self.run().await {
                Ok(()) => tracing::warn!(consumer = %self.consumer, "change feed ended"),
                Err(e) => tracing::error!(
                    consumer = %self.consumer,
                    error = %e,
                    retry_in = ?delay,
                    "change feed producer failed"
                ),
            }
            metrics::counter!("change_feed_restarts_total").increment(1);

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(config.retry_max_delay);
        }
    }

    async fn deliver(&self, item: FeedItem) -> Result<()> {
        let offset = item.offset;
        self.topic.publish(item).await?;
        self.offsets.commit(&self.consumer, offset).await?;

        metrics::counter!("change_feed_events_published_total").increment(1);
        tracing::trace!(%offset, "published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use common::EntityId;
    use domain::{GreetingService, RuntimeConfig};
    use event_store::{
        AppendOptions, EventEnvelope, EventQuery, EventStoreError, InMemoryEventStore,
        Result as StoreResult, Snapshot, Version,
    };
    use tokio::sync::Mutex;

    use crate::{ChangeFeedError, FeedConfig, InMemoryOffsetStore};

    /// Topic that records what it was given and can be told to fail.
    #[derive(Clone, Default)]
    struct RecordingTopic {
        items: Arc<Mutex<Vec<FeedItem>>>,
        fail_at: Option<Offset>,
    }

    #[async_trait]
    impl Topic for RecordingTopic {
        async fn publish(&self, item: FeedItem) -> Result<()> {
            if self.fail_at == Some(item.offset) {
                return Err(ChangeFeedError::Topic("broker unavailable".to_string()));
            }
            self.items.lock().await.push(item);
            Ok(())
        }
    }

    async fn store_with_greetings(messages: &[&str]) -> InMemoryEventStore {
        let store = InMemoryEventStore::new();
        let service = GreetingService::new(store.clone(), RuntimeConfig::default());
        for message in messages {
            service
                .use_greeting(&EntityId::from("alice"), message)
                .await
                .unwrap();
        }
        store
    }

    /// Event store whose next `failing_queries` tag queries fail.
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: InMemoryEventStore,
        failing_queries: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventStore for FlakyStore {
        async fn append(
            &self,
            events: Vec<EventEnvelope>,
            options: AppendOptions,
        ) -> StoreResult<Version> {
            self.inner.append(events, options).await
        }

        async fn get_events_for_entity(
            &self,
            entity_id: &EntityId,
        ) -> StoreResult<Vec<EventEnvelope>> {
            self.inner.get_events_for_entity(entity_id).await
        }

        async fn get_events_for_entity_from_version(
            &self,
            entity_id: &EntityId,
            from_version: Version,
        ) -> StoreResult<Vec<EventEnvelope>> {
            self.inner
                .get_events_for_entity_from_version(entity_id, from_version)
                .await
        }

        async fn query_events(&self, query: EventQuery) -> StoreResult<Vec<EventEnvelope>> {
            let failing = self
                .failing_queries
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if failing.is_ok() {
                return Err(EventStoreError::InvalidAppend("connection reset".to_string()));
            }
            self.inner.query_events(query).await
        }

        async fn get_entity_version(&self, entity_id: &EntityId) -> StoreResult<Option<Version>> {
            self.inner.get_entity_version(entity_id).await
        }

        async fn save_snapshot(&self, snapshot: Snapshot) -> StoreResult<()> {
            self.inner.save_snapshot(snapshot).await
        }

        async fn get_snapshot(&self, entity_id: &EntityId) -> StoreResult<Option<Snapshot>> {
            self.inner.get_snapshot(entity_id).await
        }
    }

    fn fast_config() -> FeedConfig {
        FeedConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 2,
            retry_base_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(40),
        }
    }

    fn publisher(store: InMemoryEventStore) -> ChangeFeedPublisher<InMemoryEventStore> {
        ChangeFeedPublisher::new(store, fast_config())
    }

    async fn wait_for_items(topic: &RecordingTopic, count: usize) -> Vec<Offset> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let items = topic.items.lock().await;
                if items.len() >= count {
                    return items.iter().map(|i| i.offset).collect::<Vec<_>>();
                }
                drop(items);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("producer did not publish in time")
    }

    #[tokio::test]
    async fn test_publish_pending_commits_last_offset() {
        let store = store_with_greetings(&["a", "b", "c"]).await;
        let offsets = InMemoryOffsetStore::new();
        let topic = RecordingTopic::default();
        let producer = TopicProducer::new(publisher(store), offsets.clone(), topic.clone(), "feed");

        assert_eq!(producer.publish_pending().await.unwrap(), 3);
        assert_eq!(topic.items.lock().await.len(), 3);
        assert_eq!(offsets.load("feed").await.unwrap(), Some(Offset::new(3)));

        assert_eq!(producer.publish_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resumes_from_committed_offset() {
        let store = store_with_greetings(&["a", "b", "c"]).await;
        let offsets = InMemoryOffsetStore::new();
        offsets.commit("feed", Offset::new(2)).await.unwrap();
        let topic = RecordingTopic::default();
        let producer = TopicProducer::new(publisher(store), offsets, topic.clone(), "feed");

        assert_eq!(producer.start_offset().await.unwrap(), Offset::new(3));
        assert_eq!(producer.publish_pending().await.unwrap(), 1);
        assert_eq!(topic.items.lock().await[0].offset, Offset::new(3));
    }

    #[tokio::test]
    async fn test_failed_publish_is_not_committed() {
        let store = store_with_greetings(&["a", "b", "c"]).await;
        let offsets = InMemoryOffsetStore::new();
        let topic = RecordingTopic {
            fail_at: Some(Offset::new(2)),
            ..RecordingTopic::default()
        };
        let producer =
            TopicProducer::new(publisher(store.clone()), offsets.clone(), topic, "feed");

        assert!(matches!(
            producer.publish_pending().await,
            Err(ChangeFeedError::Topic(_))
        ));
        assert_eq!(offsets.load("feed").await.unwrap(), Some(Offset::new(1)));

        let healthy = RecordingTopic::default();
        let retry = TopicProducer::new(publisher(store), offsets, healthy.clone(), "feed");
        assert_eq!(retry.publish_pending().await.unwrap(), 2);
        assert_eq!(healthy.items.lock().await[0].offset, Offset::new(2));
    }

    #[tokio::test]
    async fn test_run_with_retry_survives_a_failed_read() {
        let store = FlakyStore::default();
        let service = GreetingService::new(store.clone(), RuntimeConfig::default());
        let id = EntityId::from("alice");
        service.use_greeting(&id, "a").await.unwrap();
        store.failing_queries.store(1, Ordering::SeqCst);

        let topic = RecordingTopic::default();
        let producer = TopicProducer::new(
            ChangeFeedPublisher::new(store.clone(), fast_config()),
            InMemoryOffsetStore::new(),
            topic.clone(),
            "feed",
        );
        let running = tokio::spawn(async move { producer.run_with_retry().await });

        assert_eq!(wait_for_items(&topic, 1).await, vec![Offset::new(1)]);
        assert_eq!(store.failing_queries.load(Ordering::SeqCst), 0);

        service.use_greeting(&id, "b").await.unwrap();
        assert_eq!(
            wait_for_items(&topic, 2).await,
            vec![Offset::new(1), Offset::new(2)]
        );
        running.abort();
    }
}
