//! Greeting commands.

use crate::command::ReplyTo;

use super::{Confirmation, Greeting};

/// Commands accepted by a greeting entity.
///
/// Each variant carries the channel for its reply, which fixes the reply
/// type per command.
#[derive(Debug)]
pub enum GreetingCommand {
    /// Asks for a greeting for `name`. Read-only.
    Hello {
        name: String,
        reply_to: ReplyTo<Greeting>,
    },

    /// Changes the greeting message.
    UseGreetingMessage {
        message: String,
        reply_to: ReplyTo<Confirmation>,
    },
}

impl GreetingCommand {
    pub fn hello(name: impl Into<String>, reply_to: ReplyTo<Greeting>) -> Self {
        GreetingCommand::Hello {
            name: name.into(),
            reply_to,
        }
    }

    pub fn use_greeting_message(
        message: impl Into<String>,
        reply_to: ReplyTo<Confirmation>,
    ) -> Self {
        GreetingCommand::UseGreetingMessage {
            message: message.into(),
            reply_to,
        }
    }

    /// Returns the command name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            GreetingCommand::Hello { .. } => "Hello",
            GreetingCommand::UseGreetingMessage { .. } => "UseGreetingMessage",
        }
    }
}
