//! Destination the change feed is republished to.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use event_store::{EventStore, Offset};
use futures_util::{StreamExt, stream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::{ChangeFeedPublisher, FeedItem, FeedStream, Result};

/// A pub/sub destination for feed items.
#[async_trait]
pub trait Topic: Send + Sync {
    /// Publishes one item. Returns once the topic accepted it.
    async fn publish(&self, item: FeedItem) -> Result<()>;
}

/// In-process topic backed by a tokio broadcast channel.
///
/// Subscribers receive items published after they subscribed. A subscriber
/// that falls more than `capacity` items behind reads the missed items back
/// from the event store, so it still sees each item once and in order.
#[derive(Clone)]
pub struct InMemoryTopic {
    sender: broadcast::Sender<FeedItem>,
    /// Offset of the last published item. Guards `send` so a new
    /// subscription knows exactly which items it will not receive.
    head: Arc<Mutex<Offset>>,
}

impl InMemoryTopic {
    /// Creates a topic buffering up to `capacity` items per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            head: Arc::new(Mutex::new(Offset::BEGINNING)),
        }
    }

    /// Subscribes to items published from now on.
    pub fn subscribe(&self) -> TopicSubscription {
        let head = self.head.lock().unwrap_or_else(PoisonError::into_inner);
        TopicSubscription {
            receiver: self.sender.subscribe(),
            joined_at: *head,
        }
    }

    /// Subscribes and returns the items as a stream, refilling gaps from
    /// `publisher` if the subscription lags.
    pub fn stream<S>(&self, publisher: &ChangeFeedPublisher<S>) -> FeedStream
    where
        S: EventStore + Clone + 'static,
    {
        self.subscribe().into_stream(publisher.clone())
    }

    /// Returns the offset of the last published item.
    pub fn head(&self) -> Offset {
        *self.head.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemoryTopic {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Topic for InMemoryTopic {
    async fn publish(&self, item: FeedItem) -> Result<()> {
        let mut head = self.head.lock().unwrap_or_else(PoisonError::into_inner);
        let offset = item.offset;
        if self.sender.send(item).is_err() {
            tracing::trace!("no topic subscribers");
        }
        *head = (*head).max(offset);
        Ok(())
    }
}

/// A subscription to an [`InMemoryTopic`].
pub struct TopicSubscription {
    receiver: broadcast::Receiver<FeedItem>,
    joined_at: Offset,
}

impl TopicSubscription {
    /// Returns the offset of the last item published before subscribing.
    pub fn joined_at(&self) -> Offset {
        self.joined_at
    }

    /// Turns the subscription into a stream of items.
    ///
    /// If the subscription lags, the missed items are read from `publisher`
    /// and items already yielded are not repeated. A failed store read is
    /// yielded as an error and ends the stream.
    pub fn into_stream<S>(self, publisher: ChangeFeedPublisher<S>) -> FeedStream
    where
        S: EventStore + Clone + 'static,
    {
        let live = Live {
            items: BroadcastStream::new(self.receiver),
            publisher,
            last_seen: self.joined_at,
            backlog: VecDeque::new(),
            failed: false,
        };

        Box::pin(stream::unfold(live, |mut live| async move {
            if live.failed {
                return None;
            }
            loop {
                if let Some(item) = live.backlog.pop_front() {
                    live.last_seen = item.offset;
                    return Some((Ok(item), live));
                }

                match live.items.next().await? {
                    Ok(item) if item.offset <= live.last_seen => {}
                    Ok(item) => {
                        live.last_seen = item.offset;
                        return Some((Ok(item), live));
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            skipped,
                            last_seen = %live.last_seen,
                            "topic subscriber lagged, reading missed items from the store"
                        );
                        if let Err(e) = live.refill().await {
                            live.failed = true;
                            return Some((Err(e), live));
                        }
                    }
                }
            }
        }))
    }
}

struct Live<S> {
    items: BroadcastStream<FeedItem>,
    publisher: ChangeFeedPublisher<S>,
    last_seen: Offset,
    backlog: VecDeque<FeedItem>,
    failed: bool,
}

impl<S: EventStore + Clone + 'static> Live<S> {
    /// Buffers every stored item after `last_seen`.
    async fn refill(&mut self) -> Result<()> {
        let mut from = self.last_seen.next();
        loop {
            let envelopes = self.publisher.read_batch(from).await?;
            if envelopes.is_empty() {
                return Ok(());
            }
            for envelope in &envelopes {
                let item = FeedItem::try_from(envelope)?;
                from = item.offset.next();
                self.backlog.push_back(item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FeedConfig, FeedEvent, InMemoryOffsetStore, TopicProducer};
    use common::EntityId;
    use domain::{GreetingService, RuntimeConfig};
    use event_store::InMemoryEventStore;

    fn item(offset: i64) -> FeedItem {
        FeedItem {
            event: FeedEvent::GreetingMessageChanged {
                entity_id: EntityId::from("alice"),
                message: format!("m{offset}"),
            },
            offset: Offset::new(offset),
        }
    }

    fn publisher(store: InMemoryEventStore) -> ChangeFeedPublisher<InMemoryEventStore> {
        ChangeFeedPublisher::new(store, FeedConfig::default())
    }

    async fn next_offset(stream: &mut FeedStream) -> i64 {
        stream.next().await.unwrap().unwrap().offset.as_i64()
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_advances_head() {
        let topic = InMemoryTopic::default();
        topic.publish(item(1)).await.unwrap();
        assert_eq!(topic.subscriber_count(), 0);
        assert_eq!(topic.head(), Offset::new(1));
    }

    #[tokio::test]
    async fn test_subscribers_see_later_items_in_order() {
        let topic = InMemoryTopic::new(16);
        topic.publish(item(1)).await.unwrap();

        let subscription = topic.subscribe();
        assert_eq!(subscription.joined_at(), Offset::new(1));
        let mut stream = subscription.into_stream(publisher(InMemoryEventStore::new()));
        assert_eq!(topic.subscriber_count(), 1);

        topic.publish(item(2)).await.unwrap();
        topic.publish(item(3)).await.unwrap();

        assert_eq!(next_offset(&mut stream).await, 2);
        assert_eq!(next_offset(&mut stream).await, 3);
    }

    #[tokio::test]
    async fn test_republished_items_are_not_repeated() {
        let topic = InMemoryTopic::new(16);
        let mut stream = topic.stream(&publisher(InMemoryEventStore::new()));

        for offset in [1, 2, 2, 3] {
            topic.publish(item(offset)).await.unwrap();
        }

        assert_eq!(next_offset(&mut stream).await, 1);
        assert_eq!(next_offset(&mut stream).await, 2);
        assert_eq!(next_offset(&mut stream).await, 3);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_reads_missed_items_from_store() {
        let store = InMemoryEventStore::new();
        let service = GreetingService::new(store.clone(), RuntimeConfig::default());
        for message in ["a", "b", "c", "d", "e"] {
            service
                .use_greeting(&EntityId::from("alice"), message)
                .await
                .unwrap();
        }

        let topic = InMemoryTopic::new(2);
        let mut stream = topic.stream(&publisher(store.clone()));
        let producer = TopicProducer::new(
            publisher(store),
            InMemoryOffsetStore::new(),
            topic.clone(),
            "feed",
        );
        assert_eq!(producer.publish_pending().await.unwrap(), 5);

        let mut offsets = Vec::new();
        for _ in 0..5 {
            offsets.push(next_offset(&mut stream).await);
        }
        assert_eq!(offsets, vec![1, 2, 3, 4, 5]);
    }
}
