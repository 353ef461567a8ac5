//! Domain layer for the greeting service.
//!
//! This crate provides:
//! - [`Aggregate`] and [`DomainEvent`] traits for event-sourced entities
//! - Reply-typed command handling through [`ReplyTo`] and [`Effect`]
//! - A per-entity actor runtime ([`EntityRegistry`], [`EntityRef`]) that
//!   serializes commands for one id and persists events before replying
//! - The greeting entity and [`GreetingService`]

pub mod aggregate;
pub mod command;
pub mod error;
pub mod greeting;
pub mod registry;
pub mod runtime;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Effect, PendingReply, Persist, ReplyTo};
pub use error::DomainError;
pub use greeting::{
    Confirmation, DEFAULT_GREETING_MESSAGE, GREETING_EVENT_TAG, Greeting, GreetingCommand,
    GreetingEvent, GreetingMessageChangedData, GreetingService, GreetingState,
};
pub use registry::EntityRegistry;
pub use runtime::{EntityRef, RuntimeConfig};
