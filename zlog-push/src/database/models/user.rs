//! Recipient model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user that may receive notifications.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserDbModel {
    pub username: String,
    /// JSON encoded list of hotword rules, possibly double-encoded.
    pub hotwords: Option<String>,
}
