//! Reply-typed command handling.
//!
//! Every command variant carries a [`ReplyTo<R>`] fixing the type of its
//! reply. A command handler answers by returning an [`Effect`], and every
//! way of building an `Effect` consumes a `ReplyTo`. A handler therefore
//! cannot finish without replying, and cannot reply twice.

use std::fmt;

use tokio::sync::oneshot;

use crate::aggregate::Aggregate;

/// Single-use channel for the reply to one command.
pub struct ReplyTo<R> {
    sender: oneshot::Sender<R>,
}

impl<R: Send + 'static> ReplyTo<R> {
    /// Creates a reply channel, returning the sender half to embed in a
    /// command and the receiver to await the reply on.
    pub fn channel() -> (Self, oneshot::Receiver<R>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    pub(crate) fn send(self, reply: R) {
        if self.sender.send(reply).is_err() {
            tracing::debug!("reply receiver dropped before the reply was sent");
        }
    }
}

impl<R> fmt::Debug for ReplyTo<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyTo")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// Reply that is released once the state it depends on is final.
///
/// For read-only commands the runtime sends it immediately; for commands
/// that persist, only after the append succeeded and the events were
/// applied.
pub struct PendingReply<A> {
    send: Box<dyn FnOnce(&A) + Send>,
}

impl<A> PendingReply<A> {
    /// Computes the reply from `state` and delivers it.
    pub fn send(self, state: &A) {
        (self.send)(state)
    }
}

impl<A> fmt::Debug for PendingReply<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PendingReply")
    }
}

/// What a command handler wants done: events to persist (zero or one) and
/// the reply to release afterwards.
#[must_use = "an effect does nothing unless returned to the runtime"]
pub struct Effect<A: Aggregate> {
    events: Vec<A::Event>,
    reply: PendingReply<A>,
}

impl<A: Aggregate> Effect<A> {
    /// Replies without persisting anything.
    pub fn reply<R: Send + 'static>(reply_to: ReplyTo<R>, reply: R) -> Self {
        Self {
            events: Vec::new(),
            reply: PendingReply {
                send: Box::new(move |_: &A| reply_to.send(reply)),
            },
        }
    }

    /// Persists an event. Call [`Persist::then_reply`] to finish the effect.
    pub fn persist(event: A::Event) -> Persist<A> {
        Persist { event }
    }

    /// Returns the events this effect persists.
    pub fn events(&self) -> &[A::Event] {
        &self.events
    }

    /// Returns true if the effect persists nothing.
    pub fn is_read_only(&self) -> bool {
        self.events.is_empty()
    }

    /// Splits the effect into the events to persist and the pending reply.
    pub fn into_parts(self) -> (Vec<A::Event>, PendingReply<A>) {
        (self.events, self.reply)
    }
}

impl<A: Aggregate> fmt::Debug for Effect<A>
where
    A::Event: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// An event waiting for its reply. Not an [`Effect`] on its own.
#[must_use = "call `then_reply` to turn this into an effect"]
pub struct Persist<A: Aggregate> {
    event: A::Event,
}

impl<A: Aggregate> Persist<A> {
    /// Replies with `f(new_state)` once the event is persisted and applied.
    pub fn then_reply<R, F>(self, reply_to: ReplyTo<R>, f: F) -> Effect<A>
    where
        R: Send + 'static,
        F: FnOnce(&A) -> R + Send + 'static,
    {
        Effect {
            events: vec![self.event],
            reply: PendingReply {
                send: Box::new(move |state: &A| reply_to.send(f(state))),
            },
        }
    }
}
