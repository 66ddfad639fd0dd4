//! Validated rule sets of every recipient, fixed for one run.

use std::collections::BTreeMap;

use super::evaluator::RuleEvaluator;
use super::types::Rule;
use crate::database::models::LogEventDbModel;

/// Recipient name to that recipient's validated, non-empty rule list.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    rules: BTreeMap<String, Vec<Rule>>,
}

impl RuleBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recipient. Empty rule sets are dropped.
    pub fn insert(&mut self, recipient: impl Into<String>, rules: Vec<Rule>) {
        if !rules.is_empty() {
            self.rules.insert(recipient.into(), rules);
        }
    }

    pub fn with(mut self, recipient: impl Into<String>, rules: Vec<Rule>) -> Self {
        self.insert(recipient, rules);
        self
    }

    pub fn rules_for(&self, recipient: &str) -> Option<&[Rule]> {
        self.rules.get(recipient).map(Vec::as_slice)
    }

    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Recipients with at least one rule firing for `event`, in name order.
    pub fn matching_recipients<'a>(&'a self, event: &LogEventDbModel) -> Vec<&'a str> {
        self.rules
            .iter()
            .filter(|(_, rules)| RuleEvaluator::matches_any(rules, event))
            .map(|(recipient, _)| recipient.as_str())
            .collect()
    }
}
