//! Chat log event model, shared by `logs` and `logs_queue`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Event types that are routed through the rule engine.
pub const ROUTABLE_TYPES: [&str; 2] = ["msg", "action"];

/// One chat log entry.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct LogEventDbModel {
    pub id: i64,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Owning bouncer account.
    pub user: Option<String>,
    pub network: Option<String>,
    /// `#channel` or the peer nickname of a private conversation.
    pub window: String,
    /// `msg`, `action`, `join`, `part`, ...
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    /// Sender.
    pub nick: Option<String>,
    pub message: Option<String>,
}

impl LogEventDbModel {
    pub fn new(id: i64, kind: impl Into<String>, window: impl Into<String>) -> Self {
        Self {
            id,
            created_at: crate::database::time::now_ms(),
            user: None,
            network: None,
            window: window.into(),
            kind: kind.into(),
            nick: None,
            message: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_nick(mut self, nick: impl Into<String>) -> Self {
        self.nick = Some(nick.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether this event type is considered for notifications at all.
    pub fn is_routable(&self) -> bool {
        ROUTABLE_TYPES.contains(&self.kind.as_str())
    }

    /// A direct conversation: the window is named after the sender and is not a channel.
    pub fn is_private_conversation(&self) -> bool {
        self.nick.as_deref() == Some(self.window.as_str()) && !self.window.starts_with('#')
    }

    /// Look up a field by its column name, as addressed by rule conditions.
    ///
    /// Returns `None` for names that are not event fields.
    pub fn field(&self, name: &str) -> Option<Value> {
        let opt = |v: &Option<String>| v.clone().map_or(Value::Null, Value::String);
        match name {
            "id" => Some(Value::from(self.id)),
            "created_at" => Some(Value::from(self.created_at)),
            "type" => Some(Value::String(self.kind.clone())),
            "window" => Some(Value::String(self.window.clone())),
            "user" => Some(opt(&self.user)),
            "network" => Some(opt(&self.network)),
            "nick" => Some(opt(&self.nick)),
            "message" => Some(opt(&self.message)),
            _ => None,
        }
    }
}
