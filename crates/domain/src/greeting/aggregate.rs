//! Greeting entity behavior.

use chrono::Utc;

use crate::aggregate::Aggregate;
use crate::command::Effect;

use super::{
    Confirmation, DEFAULT_GREETING_MESSAGE, GREETING_EVENT_TAG, Greeting, GreetingCommand,
    GreetingEvent, GreetingState,
};

impl Aggregate for GreetingState {
    type Command = GreetingCommand;
    type Event = GreetingEvent;

    fn aggregate_type() -> &'static str {
        "Greeting"
    }

    fn tag() -> &'static str {
        GREETING_EVENT_TAG
    }

    fn initial() -> Self {
        Self {
            message: DEFAULT_GREETING_MESSAGE.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn handle(&self, command: Self::Command) -> Effect<Self> {
        match command {
            GreetingCommand::Hello { name, reply_to } => {
                Effect::reply(reply_to, Greeting::new(self.greet(&name)))
            }
            GreetingCommand::UseGreetingMessage { message, reply_to } => {
                Effect::persist(GreetingEvent::greeting_message_changed(message))
                    .then_reply(reply_to, |_| Confirmation::Accepted)
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            GreetingEvent::GreetingMessageChanged(data) => {
                self.message = data.message;
                self.timestamp = data.changed_at;
            }
        }
    }
}
