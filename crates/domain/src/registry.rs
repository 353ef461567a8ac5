//! Lookup of live entity actors by id.

use std::collections::HashMap;
use std::sync::Arc;

use common::EntityId;
use event_store::EventStore;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::aggregate::Aggregate;
use crate::command::ReplyTo;
use crate::error::DomainError;
use crate::runtime::{EntityRef, RuntimeConfig, await_reply, spawn_entity};

struct Entry<A: Aggregate> {
    sender: mpsc::Sender<A::Command>,
    task: JoinHandle<()>,
}

/// Routes commands to entity actors, starting them on first use.
///
/// An actor that passivated or stopped after a failure is replaced on the
/// next lookup. The replacement waits for the old task to exit before it
/// recovers, so commands for one id are never processed concurrently.
pub struct EntityRegistry<S, A: Aggregate> {
    store: S,
    config: RuntimeConfig,
    entities: Arc<Mutex<HashMap<EntityId, Entry<A>>>>,
}

impl<S: Clone, A: Aggregate> Clone for EntityRegistry<S, A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            entities: Arc::clone(&self.entities),
        }
    }
}

impl<S, A> EntityRegistry<S, A>
where
    S: EventStore + Clone + 'static,
    A: Aggregate,
{
    /// Creates a registry that loads and persists entities through `store`.
    pub fn new(store: S, config: RuntimeConfig) -> Self {
        Self {
            store,
            config,
            entities: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the backing event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns a handle to the entity, starting its actor if none is running.
    pub async fn entity_ref(&self, entity_id: &EntityId) -> EntityRef<A> {
        let sender = self.live_sender(entity_id).await;
        EntityRef::new(entity_id.clone(), sender, self.config.ask_timeout)
    }

    /// Sends the command built by `f` to the entity and waits for its reply.
    ///
    /// If the actor closes its mailbox between lookup and send (it was
    /// passivating), the command is handed to a fresh actor once.
    pub async fn ask<R, F>(&self, entity_id: &EntityId, f: F) -> Result<R, DomainError>
    where
        R: Send + 'static,
        F: FnOnce(ReplyTo<R>) -> A::Command,
    {
        let (reply_to, reply) = ReplyTo::channel();
        let mut command = f(reply_to);

        let exchange = async move {
            for attempt in 0..2 {
                let sender = self.live_sender(entity_id).await;
                match sender.send(command).await {
                    Ok(()) => return await_reply(entity_id, reply).await,
                    Err(mpsc::error::SendError(returned)) => {
                        tracing::debug!(%entity_id, attempt, "mailbox closed, retrying");
                        command = returned;
                    }
                }
            }
            Err(DomainError::EntityUnavailable {
                entity_id: entity_id.clone(),
            })
        };

        tokio::time::timeout(self.config.ask_timeout, exchange)
            .await
            .unwrap_or_else(|_| {
                Err(DomainError::AskTimeout {
                    entity_id: entity_id.clone(),
                    timeout: self.config.ask_timeout,
                })
            })
    }

    /// Returns the number of entities with an open mailbox.
    pub async fn live_entities(&self) -> usize {
        self.entities
            .lock()
            .await
            .values()
            .filter(|entry| !entry.sender.is_closed())
            .count()
    }

    async fn live_sender(&self, entity_id: &EntityId) -> mpsc::Sender<A::Command> {
        let mut entities = self.entities.lock().await;

        if let Some(entry) = entities.get(entity_id)
            && !entry.sender.is_closed()
        {
            return entry.sender.clone();
        }

        let previous = entities.remove(entity_id).map(|entry| entry.task);
        entities.retain(|_, entry| !entry.task.is_finished());

        tracing::debug!(%entity_id, respawn = previous.is_some(), "starting entity");
        let (sender, task) = spawn_entity::<S, A>(
            self.store.clone(),
            entity_id.clone(),
            self.config.clone(),
            previous,
        );
        entities.insert(
            entity_id.clone(),
            Entry {
                sender: sender.clone(),
                task,
            },
        );
        sender
    }
}
