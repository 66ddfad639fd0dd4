//! Private conversation tracking key.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::LogEventDbModel;

/// `(window, nick)` pair identifying a tracked private conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, FromRow, Serialize, Deserialize)]
pub struct PmKey {
    pub window: String,
    pub nick: String,
}

impl PmKey {
    pub fn new(window: impl Into<String>, nick: impl Into<String>) -> Self {
        Self {
            window: window.into(),
            nick: nick.into(),
        }
    }

    /// Key for a private conversation event, `None` for channel traffic.
    pub fn from_event(event: &LogEventDbModel) -> Option<Self> {
        if !event.is_private_conversation() {
            return None;
        }
        let nick = event.nick.as_deref()?;
        Some(Self::new(event.window.as_str(), nick))
    }
}
