//! Per-entity actor that owns an entity's state and processes its commands.
//!
//! Each live entity id runs as one tokio task reading commands from a
//! bounded mailbox. The task recovers state from the event store before
//! reading its first command, then handles commands strictly one at a time:
//! decide, append, apply, reply. Callers talk to it through [`EntityRef`].

use std::time::Duration;

use common::EntityId;
use event_store::{AppendOptions, EventEnvelope, EventStore, EventStoreExt, Snapshot, Version};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::command::ReplyTo;
use crate::error::DomainError;

/// Tuning for the entity runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How long a caller waits for a reply (mailbox wait included).
    pub ask_timeout: Duration,

    /// How long the actor waits for an append to be acknowledged.
    pub persist_timeout: Duration,

    /// Idle time after which an actor stops. The next command reloads it.
    pub passivation_timeout: Duration,

    /// Commands buffered per entity before senders wait.
    pub mailbox_capacity: usize,

    /// Save a snapshot every this many events. 0 disables snapshots.
    pub snapshot_interval: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ask_timeout: Duration::from_secs(5),
            persist_timeout: Duration::from_secs(5),
            passivation_timeout: Duration::from_secs(120),
            mailbox_capacity: 64,
            snapshot_interval: 100,
        }
    }
}

impl RuntimeConfig {
    /// Returns true if a snapshot is due at `version`.
    pub fn should_snapshot(&self, version: Version) -> bool {
        self.snapshot_interval > 0
            && version.as_i64() > 0
            && version.as_i64() as u64 % self.snapshot_interval == 0
    }
}

/// Cloneable handle for sending commands to one entity.
pub struct EntityRef<A: Aggregate> {
    entity_id: EntityId,
    sender: mpsc::Sender<A::Command>,
    ask_timeout: Duration,
}

impl<A: Aggregate> Clone for EntityRef<A> {
    fn clone(&self) -> Self {
        Self {
            entity_id: self.entity_id.clone(),
            sender: self.sender.clone(),
            ask_timeout: self.ask_timeout,
        }
    }
}

impl<A: Aggregate> EntityRef<A> {
    pub(crate) fn new(
        entity_id: EntityId,
        sender: mpsc::Sender<A::Command>,
        ask_timeout: Duration,
    ) -> Self {
        Self {
            entity_id,
            sender,
            ask_timeout,
        }
    }

    /// Returns the id of the entity this handle addresses.
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Returns true while the entity's mailbox accepts commands.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Sends the command built by `f` and waits for its reply.
    ///
    /// The reply type `R` is fixed by the [`ReplyTo`] the command variant
    /// carries.
    pub async fn ask<R, F>(&self, f: F) -> Result<R, DomainError>
    where
        R: Send + 'static,
        F: FnOnce(ReplyTo<R>) -> A::Command,
    {
        let (reply_to, reply) = ReplyTo::channel();
        let command = f(reply_to);

        let exchange = async {
            self.sender
                .send(command)
                .await
                .map_err(|_| DomainError::EntityUnavailable {
                    entity_id: self.entity_id.clone(),
                })?;
            await_reply(&self.entity_id, reply).await
        };

        tokio::time::timeout(self.ask_timeout, exchange)
            .await
            .unwrap_or_else(|_| {
                Err(DomainError::AskTimeout {
                    entity_id: self.entity_id.clone(),
                    timeout: self.ask_timeout,
                })
            })
    }
}

pub(crate) async fn await_reply<R>(
    entity_id: &EntityId,
    reply: oneshot::Receiver<R>,
) -> Result<R, DomainError> {
    reply.await.map_err(|_| DomainError::NoReply {
        entity_id: entity_id.clone(),
    })
}

/// Starts the actor task for `entity_id`.
///
/// If `previous` is the task of an earlier actor for the same id, the new
/// actor waits for it to finish before recovering, so at most one actor
/// processes commands for an id at any time.
pub(crate) fn spawn_entity<S, A>(
    store: S,
    entity_id: EntityId,
    config: RuntimeConfig,
    previous: Option<JoinHandle<()>>,
) -> (mpsc::Sender<A::Command>, JoinHandle<()>)
where
    S: EventStore + Clone + 'static,
    A: Aggregate,
{
    let (sender, mailbox) = mpsc::channel(config.mailbox_capacity.max(1));
    let span = tracing::info_span!(
        "entity",
        entity_type = A::aggregate_type(),
        entity_id = %entity_id
    );
    let task = tokio::spawn(tracing::Instrument::instrument(
        run_entity::<S, A>(store, entity_id, config, mailbox, previous),
        span,
    ));
    (sender, task)
}

async fn run_entity<S, A>(
    store: S,
    entity_id: EntityId,
    config: RuntimeConfig,
    mut mailbox: mpsc::Receiver<A::Command>,
    previous: Option<JoinHandle<()>>,
) where
    S: EventStore + Clone + 'static,
    A: Aggregate,
{
    if let Some(previous) = previous {
        // A panicked predecessor wrote nothing we need; recovery rereads the log.
        let _ = previous.await;
    }

    let mut actor = match EntityActor::<S, A>::recover(store, entity_id, config).await {
        Ok(actor) => actor,
        Err(e) => {
            tracing::error!(error = %e, "failed to recover entity, stopping");
            return;
        }
    };

    loop {
        match tokio::time::timeout(actor.config.passivation_timeout, mailbox.recv()).await {
            Ok(Some(command)) => {
                if let Err(e) = actor.handle(command).await {
                    tracing::error!(error = %e, "command failed, stopping entity");
                    return;
                }
            }
            Ok(None) => break,
            Err(_) => {
                tracing::debug!("entity idle, passivating");
                // Refuse new commands but finish the ones already queued.
                mailbox.close();
                while let Some(command) = mailbox.recv().await {
                    if let Err(e) = actor.handle(command).await {
                        tracing::error!(error = %e, "command failed while passivating");
                        return;
                    }
                }
                break;
            }
        }
    }
}

struct EntityActor<S, A> {
    store: S,
    entity_id: EntityId,
    config: RuntimeConfig,
    state: A,
    version: Version,
}

impl<S, A> EntityActor<S, A>
where
    S: EventStore + Clone + 'static,
    A: Aggregate,
{
    /// Rebuilds state from the latest snapshot (if any) and the events after it.
    async fn recover(
        store: S,
        entity_id: EntityId,
        config: RuntimeConfig,
    ) -> Result<Self, DomainError> {
        let (snapshot, envelopes) = store.load_entity(&entity_id).await?;

        let (mut state, mut version) = match snapshot {
            Some(snapshot) => {
                let version = snapshot.version;
                (snapshot.into_state::<A>()?, version)
            }
            None => (A::initial(), Version::initial()),
        };

        let replayed = envelopes.len();
        for envelope in envelopes {
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            state.apply(event);
            version = envelope.version;
        }

        tracing::debug!(%version, replayed, "entity recovered");

        Ok(Self {
            store,
            entity_id,
            config,
            state,
            version,
        })
    }

    async fn handle(&mut self, command: A::Command) -> Result<(), DomainError> {
        metrics::counter!("entity_commands_total", "entity_type" => A::aggregate_type())
            .increment(1);

        let (events, reply) = self.state.handle(command).into_parts();

        if events.is_empty() {
            reply.send(&self.state);
            return Ok(());
        }

        let envelopes = self.build_envelopes(&events)?;
        let append = self
            .store
            .append(envelopes, AppendOptions::expect_version(self.version));

        let new_version = match tokio::time::timeout(self.config.persist_timeout, append).await {
            Ok(Ok(version)) => version,
            Ok(Err(e)) => {
                metrics::counter!("persist_failures_total").increment(1);
                return Err(e.into());
            }
            Err(_) => {
                metrics::counter!("persist_failures_total").increment(1);
                return Err(DomainError::PersistTimeout {
                    entity_id: self.entity_id.clone(),
                    timeout: self.config.persist_timeout,
                });
            }
        };

        metrics::counter!("events_persisted_total").increment(events.len() as u64);

        self.state.apply_events(events);
        self.version = new_version;

        if self.config.should_snapshot(self.version) {
            self.save_snapshot().await;
        }

        reply.send(&self.state);
        Ok(())
    }

    fn build_envelopes(&self, events: &[A::Event]) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = self.version;

        for event in events {
            version = version.next();
            let envelope = EventEnvelope::builder()
                .entity_id(self.entity_id.clone())
                .entity_type(A::aggregate_type())
                .event_type(event.event_type())
                .tag(A::tag())
                .version(version)
                .payload(event)?
                .build();
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }

    async fn save_snapshot(&self) {
        let result = match Snapshot::from_state(
            self.entity_id.clone(),
            A::aggregate_type(),
            self.version,
            &self.state,
        ) {
            Ok(snapshot) => self.store.save_snapshot(snapshot).await.map_err(DomainError::from),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            // The log is still complete; the next recovery just replays more.
            tracing::warn!(error = %e, version = %self.version, "failed to save snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_timeouts() {
        let config = RuntimeConfig::default();
        assert_eq!(config.ask_timeout, Duration::from_secs(5));
        assert_eq!(config.persist_timeout, Duration::from_secs(5));
        assert_eq!(config.snapshot_interval, 100);
    }

    #[test]
    fn snapshot_due_on_interval_multiples() {
        let config = RuntimeConfig {
            snapshot_interval: 3,
            ..RuntimeConfig::default()
        };
        assert!(!config.should_snapshot(Version::initial()));
        assert!(!config.should_snapshot(Version::new(2)));
        assert!(config.should_snapshot(Version::new(3)));
        assert!(config.should_snapshot(Version::new(6)));
    }

    #[test]
    fn snapshot_interval_zero_disables_snapshots() {
        let config = RuntimeConfig {
            snapshot_interval: 0,
            ..RuntimeConfig::default()
        };
        assert!(!config.should_snapshot(Version::new(100)));
    }
}
