//! Ordered, resumable stream of converted greeting events.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use domain::GREETING_EVENT_TAG;
use event_store::{EventEnvelope, EventQuery, EventStore, Offset};
use futures_util::{Stream, stream};

use crate::{ChangeFeedError, FeedItem, Result};

/// A stream of feed items. Ends after yielding its first error.
pub type FeedStream = Pin<Box<dyn Stream<Item = Result<FeedItem>> + Send>>;

/// Polling settings for the feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// How long to wait before polling again once caught up.
    pub poll_interval: Duration,

    /// Maximum events read from the store per query.
    pub batch_size: usize,

    /// First delay before a failed producer restarts. Doubles per failure.
    pub retry_base_delay: Duration,

    /// Upper bound for the restart delay.
    pub retry_max_delay: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            batch_size: 128,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(10),
        }
    }
}

/// Reads every persisted greeting event, across all entities, in offset
/// order.
#[derive(Clone)]
pub struct ChangeFeedPublisher<S> {
    store: S,
    config: FeedConfig,
}

impl<S: EventStore + Clone + 'static> ChangeFeedPublisher<S> {
    /// Creates a publisher reading from `store`.
    pub fn new(store: S, config: FeedConfig) -> Self {
        Self { store, config }
    }

    /// Returns the polling settings.
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Returns the events stored at or after `from`, then follows new ones.
    ///
    /// The stream never ends on its own while the store is healthy. A
    /// payload that is not a greeting event, or a failed store read, is
    /// yielded as an error and ends the stream.
    pub fn events(&self, from: Offset) -> FeedStream {
        let cursor = Cursor {
            store: self.store.clone(),
            config: self.config.clone(),
            next: from,
            buffer: VecDeque::new(),
            pending_error: None,
            finished: false,
        };

        Box::pin(stream::unfold(cursor, |mut cursor| async move {
            loop {
                if let Some(item) = cursor.buffer.pop_front() {
                    return Some((Ok(item), cursor));
                }
                if let Some(error) = cursor.pending_error.take() {
                    cursor.finished = true;
                    return Some((Err(error), cursor));
                }
                if cursor.finished {
                    return None;
                }

                match cursor.fill().await {
                    Ok(0) if cursor.pending_error.is_none() => {
                        tokio::time::sleep(cursor.config.poll_interval).await;
                    }
                    Ok(_) => {}
                    Err(e) => cursor.pending_error = Some(e),
                }
            }
        }))
    }

    /// Resumes after the last delivered offset without repeating it.
    pub fn events_after(&self, last_delivered: Offset) -> FeedStream {
        self.events(last_delivered.next())
    }

    /// Reads up to one batch of raw envelopes starting at `from`.
    pub(crate) async fn read_batch(&self, from: Offset) -> Result<Vec<EventEnvelope>> {
        read_batch(&self.store, from, self.config.batch_size).await
    }
}

async fn read_batch<S: EventStore>(
    store: &S,
    from: Offset,
    batch_size: usize,
) -> Result<Vec<EventEnvelope>> {
    let query = EventQuery::for_tag(GREETING_EVENT_TAG)
        .from_offset(from)
        .limit(batch_size.max(1));
    Ok(store.query_events(query).await?)
}

struct Cursor<S> {
    store: S,
    config: FeedConfig,
    next: Offset,
    buffer: VecDeque<FeedItem>,
    pending_error: Option<ChangeFeedError>,
    finished: bool,
}

impl<S: EventStore> Cursor<S> {
    /// Buffers the next batch and returns how many items were added.
    ///
    /// Items converted before an undecodable payload stay buffered; the
    /// decode error is kept for after them.
    async fn fill(&mut self) -> Result<usize> {
        let envelopes = read_batch(&self.store, self.next, self.config.batch_size).await?;

        let mut added = 0;
        for envelope in &envelopes {
            match FeedItem::try_from(envelope) {
                Ok(item) => {
                    self.next = item.offset.next();
                    self.buffer.push_back(item);
                    added += 1;
                }
                Err(e) => {
                    tracing::error!(offset = %envelope.offset, error = %e, "undecodable event in feed");
                    self.pending_error = Some(e);
                    break;
                }
            }
        }

        tracing::trace!(added, next = %self.next, "feed batch read");
        Ok(added)
    }
}
