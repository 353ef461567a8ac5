//! Greeting entity state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message a greeting entity uses before any change was persisted.
pub const DEFAULT_GREETING_MESSAGE: &str = "Hello";

/// State of one greeting entity.
///
/// Only changed by applying events; see the [`Aggregate`](crate::Aggregate)
/// implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingState {
    /// Current greeting message.
    pub message: String,

    /// When the message last changed (creation time for a fresh entity).
    pub timestamp: DateTime<Utc>,
}

impl GreetingState {
    /// Formats the greeting for `name` verbatim.
    pub fn greet(&self, name: &str) -> String {
        format!("{}, {}!", self.message, name)
    }
}
