//! Shared types for the greeting service.

pub mod types;

pub use types::EntityId;
