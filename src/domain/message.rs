//! Instant messages exchanged outside of any session

use crate::domain::shared::derive_authorization_username;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One instant message. Not stored by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub recipient: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            body: body.into(),
            timestamp: Utc::now(),
        }
    }

    /// Short sender name for display, e.g. `alice` for `sip:alice@example.com`
    pub fn sender_user(&self) -> String {
        derive_authorization_username(&self.sender)
    }
}
