//! Resolves and validates recipient rule sets from the user table.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::book::RuleBook;
use super::types::{Rule, RuleValidationError};
use crate::Result;
use crate::database::repositories::UserRepository;

/// Why a stored rule set could not be used.
#[derive(Debug, thiserror::Error)]
pub enum RuleSetError {
    #[error("rule set is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("rule set is not a list")]
    NotAList,

    #[error("rule #{index} is invalid: {source}")]
    Invalid {
        index: usize,
        #[source]
        source: RuleValidationError,
    },
}

/// Loads every recipient's rules once per run.
pub struct RuleSetLoader {
    users: Arc<dyn UserRepository>,
}

impl RuleSetLoader {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Rules of one recipient.
    ///
    /// Unreadable, undecodable or invalid rule sets yield an empty list; a
    /// recipient with one bad rule gets no rules at all.
    pub async fn load(&self, recipient: &str) -> Vec<Rule> {
        let raw = match self.users.find_by_username(recipient).await {
            Ok(Some(user)) => user.hotwords,
            Ok(None) => {
                debug!(recipient, "Unknown recipient");
                return Vec::new();
            }
            Err(e) => {
                warn!(recipient, error = %e, "Failed to fetch rules, recipient gets none");
                return Vec::new();
            }
        };

        let Some(raw) = raw else {
            return Vec::new();
        };

        match Self::parse_rule_set(&raw) {
            Ok(rules) => rules,
            Err(e) => {
                warn!(recipient, error = %e, "Ignoring rule set");
                Vec::new()
            }
        }
    }

    /// Build the rule book for this run. Only a failure to list users is an error.
    pub async fn load_all(&self) -> Result<RuleBook> {
        let usernames = self.users.list_usernames().await?;

        let mut book = RuleBook::new();
        for username in &usernames {
            let rules = self.load(username).await;
            book.insert(username.as_str(), rules);
        }

        info!(
            users = usernames.len(),
            recipients = book.len(),
            "Loaded notification rules"
        );
        Ok(book)
    }

    /// Decode and validate a stored rule set.
    pub fn parse_rule_set(raw: &str) -> std::result::Result<Vec<Rule>, RuleSetError> {
        let mut value: Value = serde_json::from_str(raw)?;
        // Some rows were written as a JSON string wrapping the list.
        if let Value::String(inner) = &value {
            value = serde_json::from_str(inner)?;
        }

        let Value::Array(items) = value else {
            return Err(RuleSetError::NotAList);
        };

        let mut rules = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match Rule::parse(item) {
                Ok(rule) => rules.push(rule),
                Err(source) => return Err(RuleSetError::Invalid { index, source }),
            }
        }
        Ok(rules)
    }
}
