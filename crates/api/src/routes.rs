//! HTTP route handlers.

pub mod greetings;
pub mod health;
pub mod metrics;
