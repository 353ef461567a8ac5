//! Change feed for greeting events.
//!
//! This crate turns the persisted greeting events into an ordered feed:
//! - [`ChangeFeedPublisher`] reads tagged events from an offset as a lazy stream
//! - [`FeedEvent`] is the converted event, carrying the owning entity id
//! - [`OffsetStore`] remembers the last offset each consumer delivered
//! - [`Topic`] and [`TopicProducer`] republish the feed with at-least-once delivery

pub mod error;
pub mod message;
pub mod offset;
pub mod producer;
pub mod publisher;
pub mod topic;

pub use error::{ChangeFeedError, Result};
pub use message::{FeedEvent, FeedItem};
pub use offset::{InMemoryOffsetStore, OffsetStore};
pub use producer::TopicProducer;
pub use publisher::{ChangeFeedPublisher, FeedConfig, FeedStream};
pub use topic::{InMemoryTopic, Topic, TopicSubscription};
