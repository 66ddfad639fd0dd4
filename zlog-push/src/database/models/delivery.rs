//! Delivery record written to the notification and audit tables.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::LogEventDbModel;

/// Projection of a matched event for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DeliveryDbModel {
    pub id: i64,
    pub user: Option<String>,
    pub network: Option<String>,
    pub window: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub nick: Option<String>,
    pub message: Option<String>,
    /// User whose rule matched.
    pub recipient: Option<String>,
}

impl DeliveryDbModel {
    pub fn for_recipient(event: &LogEventDbModel, recipient: impl Into<String>) -> Self {
        Self {
            id: event.id,
            user: event.user.clone(),
            network: event.network.clone(),
            window: event.window.clone(),
            kind: event.kind.clone(),
            nick: event.nick.clone(),
            message: event.message.clone(),
            recipient: Some(recipient.into()),
        }
    }
}
