//! Events as published on the change feed.

use common::EntityId;
use domain::GreetingEvent;
use event_store::{EventEnvelope, Offset};
use serde::{Deserialize, Serialize};

use crate::{ChangeFeedError, Result};

/// A greeting event converted for consumers outside the entity.
///
/// Unlike the persisted [`GreetingEvent`], it names the entity it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FeedEvent {
    GreetingMessageChanged { entity_id: EntityId, message: String },
}

impl FeedEvent {
    /// Converts a domain event persisted for `entity_id`.
    pub fn from_domain(entity_id: EntityId, event: GreetingEvent) -> Self {
        match event {
            GreetingEvent::GreetingMessageChanged(data) => FeedEvent::GreetingMessageChanged {
                entity_id,
                message: data.message,
            },
        }
    }

    /// Returns the id of the entity the event belongs to.
    pub fn entity_id(&self) -> &EntityId {
        match self {
            FeedEvent::GreetingMessageChanged { entity_id, .. } => entity_id,
        }
    }
}

/// A converted event paired with the offset it was persisted at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub event: FeedEvent,
    pub offset: Offset,
}

impl TryFrom<&EventEnvelope> for FeedItem {
    type Error = ChangeFeedError;

    fn try_from(envelope: &EventEnvelope) -> Result<Self> {
        let event: GreetingEvent =
            serde_json::from_value(envelope.payload.clone()).map_err(|source| {
                ChangeFeedError::Deserialization {
                    offset: envelope.offset,
                    source,
                }
            })?;

        Ok(Self {
            event: FeedEvent::from_domain(envelope.entity_id.clone(), event),
            offset: envelope.offset,
        })
    }
}
