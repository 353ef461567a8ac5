//! Greeting domain events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Tag attached to every greeting event so the whole family can be read
/// without knowing entity ids.
pub const GREETING_EVENT_TAG: &str = "GreetingEvent";

/// Events that can occur on a greeting entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GreetingEvent {
    /// The greeting message was changed.
    GreetingMessageChanged(GreetingMessageChangedData),
}

impl DomainEvent for GreetingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            GreetingEvent::GreetingMessageChanged(_) => "GreetingMessageChanged",
        }
    }
}

/// Data for GreetingMessageChanged event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingMessageChangedData {
    /// The new greeting message.
    pub message: String,

    /// When the change was decided. Copied into the state on apply.
    pub changed_at: DateTime<Utc>,
}

impl GreetingEvent {
    /// Creates a GreetingMessageChanged event stamped with the current time.
    pub fn greeting_message_changed(message: impl Into<String>) -> Self {
        GreetingEvent::GreetingMessageChanged(GreetingMessageChangedData {
            message: message.into(),
            changed_at: Utc::now(),
        })
    }

    /// Returns the message carried by the event.
    pub fn message(&self) -> &str {
        match self {
            GreetingEvent::GreetingMessageChanged(data) => &data.message,
        }
    }
}
