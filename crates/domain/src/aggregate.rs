//! Core aggregate and domain event traits.

use serde::{Serialize, de::DeserializeOwned};

use crate::command::Effect;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns the event type name.
    ///
    /// This is used for serialization and event store filtering.
    fn event_type(&self) -> &'static str;
}

/// Trait for event-sourced entity state.
///
/// The implementing type is the entity's state. Behavior is split into two
/// pure functions:
/// - [`handle`](Aggregate::handle) decides what to persist and how to reply
/// - [`apply`](Aggregate::apply) folds a persisted event into the state
///
/// The runtime never mutates state except through `apply`, and only after
/// the events returned by `handle` are durably appended.
pub trait Aggregate: Clone + Serialize + DeserializeOwned + Send + Sync + Sized + 'static {
    /// The commands this entity accepts. Each variant carries its own
    /// [`ReplyTo`](crate::ReplyTo).
    type Command: Send + 'static;

    /// The type of events this entity produces and consumes.
    type Event: DomainEvent;

    /// Returns the entity type name.
    fn aggregate_type() -> &'static str;

    /// Returns the event-family tag attached to every persisted event.
    fn tag() -> &'static str;

    /// Returns the state of an entity with no events.
    fn initial() -> Self;

    /// Decides how to respond to a command.
    ///
    /// Must not have side effects: everything the command causes is
    /// described by the returned [`Effect`].
    fn handle(&self, command: Self::Command) -> Effect<Self>;

    /// Applies an event to the state.
    ///
    /// This method must be pure and deterministic:
    /// - Given the same state and event, it must always produce the same new state
    /// - It must not have side effects
    /// - It must not fail (events represent facts that have happened)
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ReplyTo;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum CounterEvent {
        Added { amount: i64 },
        Reset,
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Added { .. } => "Added",
                CounterEvent::Reset => "Reset",
            }
        }
    }

    #[derive(Debug)]
    enum CounterCommand {
        Add { amount: i64, reply_to: ReplyTo<i64> },
        Get { reply_to: ReplyTo<i64> },
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Counter {
        value: i64,
    }

    impl Aggregate for Counter {
        type Command = CounterCommand;
        type Event = CounterEvent;

        fn aggregate_type() -> &'static str {
            "Counter"
        }

        fn tag() -> &'static str {
            "CounterEvent"
        }

        fn initial() -> Self {
            Self::default()
        }

        fn handle(&self, command: Self::Command) -> Effect<Self> {
            match command {
                CounterCommand::Add { amount, reply_to } => {
                    Effect::persist(CounterEvent::Added { amount })
                        .then_reply(reply_to, |counter: &Counter| counter.value)
                }
                CounterCommand::Get { reply_to } => Effect::reply(reply_to, self.value),
            }
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                CounterEvent::Added { amount } => self.value += amount,
                CounterEvent::Reset => self.value = 0,
            }
        }
    }

    #[test]
    fn apply_events_folds_in_order() {
        let mut counter = Counter::initial();
        counter.apply_events(vec![
            CounterEvent::Added { amount: 5 },
            CounterEvent::Reset,
            CounterEvent::Added { amount: 2 },
        ]);
        assert_eq!(counter.value, 2);
    }

    #[test]
    fn domain_event_type() {
        assert_eq!(CounterEvent::Added { amount: 1 }.event_type(), "Added");
        assert_eq!(CounterEvent::Reset.event_type(), "Reset");
    }

    #[test]
    fn read_only_command_persists_nothing() {
        let counter = Counter { value: 7 };
        let (reply_to, mut rx) = ReplyTo::channel();

        let (events, reply) = counter.handle(CounterCommand::Get { reply_to }).into_parts();
        assert!(events.is_empty());

        reply.send(&counter);
        assert_eq!(rx.try_recv().unwrap(), 7);
    }

    #[test]
    fn persisting_command_replies_from_new_state() {
        let mut counter = Counter { value: 1 };
        let (reply_to, mut rx) = ReplyTo::channel();

        let (events, reply) = counter
            .handle(CounterCommand::Add {
                amount: 4,
                reply_to,
            })
            .into_parts();
        assert_eq!(events.len(), 1);
        assert!(rx.try_recv().is_err());

        counter.apply_events(events);
        reply.send(&counter);
        assert_eq!(rx.try_recv().unwrap(), 5);
    }
}
