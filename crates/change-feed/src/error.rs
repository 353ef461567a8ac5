//! Change feed error types.

use event_store::Offset;
use thiserror::Error;

/// Errors that can occur while reading or republishing the feed.
#[derive(Debug, Error)]
pub enum ChangeFeedError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// A persisted payload is not a known greeting event.
    #[error("Cannot decode event at offset {offset}: {source}")]
    Deserialization {
        offset: Offset,
        #[source]
        source: serde_json::Error,
    },

    /// The topic refused a message.
    #[error("Topic error: {0}")]
    Topic(String),
}

/// Result type for change feed operations.
pub type Result<T> = std::result::Result<T, ChangeFeedError>;
