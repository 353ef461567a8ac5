//! Greeting entity and related types.
//!
//! A greeting entity holds the message used to greet people. `Hello`
//! answers with that message; `UseGreetingMessage` changes it by persisting
//! a [`GreetingEvent::GreetingMessageChanged`].

mod aggregate;
mod commands;
mod events;
mod replies;
mod service;
mod state;

pub use commands::GreetingCommand;
pub use events::{GREETING_EVENT_TAG, GreetingEvent, GreetingMessageChangedData};
pub use replies::{Confirmation, Greeting};
pub use service::GreetingService;
pub use state::{DEFAULT_GREETING_MESSAGE, GreetingState};
