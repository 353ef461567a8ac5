//! Replies sent by the greeting entity.

use serde::{Deserialize, Serialize};

/// Answer to `Hello`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub message: String,
}

impl Greeting {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Answer to `UseGreetingMessage`.
///
/// No current command path produces `Rejected`; it is kept so validation
/// can be added without changing the reply type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Confirmation {
    Accepted,
    Rejected { reason: String },
}

impl Confirmation {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Confirmation::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Confirmation::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_json() {
        assert_eq!(
            serde_json::to_value(Confirmation::Accepted).unwrap(),
            serde_json::json!({"status": "accepted"})
        );
        assert_eq!(
            serde_json::to_value(Confirmation::rejected("empty message")).unwrap(),
            serde_json::json!({"status": "rejected", "reason": "empty message"})
        );
    }

    #[test]
    fn is_accepted() {
        assert!(Confirmation::Accepted.is_accepted());
        assert!(!Confirmation::rejected("no").is_accepted());
    }
}
