//! Greeting service providing a simplified API for greeting operations.

use common::EntityId;
use event_store::EventStore;

use crate::error::DomainError;
use crate::registry::EntityRegistry;
use crate::runtime::RuntimeConfig;

use super::{Confirmation, Greeting, GreetingCommand, GreetingState};

/// Service for greeting entities.
///
/// Routes each call to the entity with the given id through the
/// [`EntityRegistry`].
pub struct GreetingService<S> {
    registry: EntityRegistry<S, GreetingState>,
}

impl<S: Clone> Clone for GreetingService<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<S: EventStore + Clone + 'static> GreetingService<S> {
    /// Creates a new greeting service with the given event store.
    pub fn new(store: S, config: RuntimeConfig) -> Self {
        Self {
            registry: EntityRegistry::new(store, config),
        }
    }

    /// Returns a reference to the underlying registry.
    pub fn registry(&self) -> &EntityRegistry<S, GreetingState> {
        &self.registry
    }

    /// Greets `name` with the entity's current message.
    #[tracing::instrument(skip(self))]
    pub async fn hello(&self, entity_id: &EntityId, name: &str) -> Result<Greeting, DomainError> {
        metrics::counter!("greeting_commands_total", "command" => "Hello").increment(1);

        self.registry
            .ask(entity_id, |reply_to| GreetingCommand::hello(name, reply_to))
            .await
    }

    /// Changes the entity's greeting message.
    ///
    /// Returns once the change is persisted.
    #[tracing::instrument(skip(self))]
    pub async fn use_greeting(
        &self,
        entity_id: &EntityId,
        message: &str,
    ) -> Result<Confirmation, DomainError> {
        metrics::counter!("greeting_commands_total", "command" => "UseGreetingMessage")
            .increment(1);

        let confirmation = self
            .registry
            .ask(entity_id, |reply_to| {
                GreetingCommand::use_greeting_message(message, reply_to)
            })
            .await?;

        if let Confirmation::Rejected { reason } = &confirmation {
            tracing::info!(%reason, "greeting message rejected");
        }

        Ok(confirmation)
    }
}
