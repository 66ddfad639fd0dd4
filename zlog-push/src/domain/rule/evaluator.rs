//! Rule evaluation against chat log events.

use std::borrow::Cow;

use serde_json::Value;
use tracing::debug;

use super::types::{Conditions, Rule, SubstringRule};
use crate::database::models::LogEventDbModel;

/// Error type for rule evaluation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleEvalError {
    #[error("event {id} has no {field}")]
    MissingField { id: i64, field: &'static str },
}

/// Lower-cases comparison text unless the rule is case sensitive.
#[derive(Debug, Clone, Copy)]
struct CaseFold {
    case_sensitive: bool,
}

impl CaseFold {
    fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.case_sensitive {
            Cow::Borrowed(text)
        } else {
            Cow::Owned(text.to_lowercase())
        }
    }

    /// Equality between a configured value and an event field, folding when both are strings.
    fn values_equal(&self, expected: &Value, actual: &Value) -> bool {
        match (expected, actual) {
            (Value::String(e), Value::String(a)) => self.apply(e) == self.apply(a),
            _ => expected == actual,
        }
    }
}

/// Evaluator for hotword rules.
pub struct RuleEvaluator;

impl RuleEvaluator {
    /// Whether `rule` fires for `event`.
    ///
    /// Evaluation failures are logged and count as "no match"; this never
    /// aborts the caller.
    pub fn evaluate(rule: &Rule, event: &LogEventDbModel) -> bool {
        match Self::try_evaluate(rule, event) {
            Ok(matched) => {
                if matched {
                    debug!(event_id = event.id, rule = rule.kind(), "Rule matched");
                }
                matched
            }
            Err(e) => {
                debug!(
                    event_id = event.id,
                    rule = rule.kind(),
                    error = %e,
                    "Rule evaluation failed, treating as non-matching"
                );
                false
            }
        }
    }

    /// Whether any rule of a recipient fires for `event`.
    pub fn matches_any(rules: &[Rule], event: &LogEventDbModel) -> bool {
        rules.iter().any(|rule| Self::evaluate(rule, event))
    }

    /// Evaluate without swallowing failures.
    pub fn try_evaluate(rule: &Rule, event: &LogEventDbModel) -> Result<bool, RuleEvalError> {
        match rule {
            Rule::PrivateMessage => Ok(event.is_private_conversation()),
            Rule::Substring(substring) => Self::evaluate_substring(substring, event),
        }
    }

    fn evaluate_substring(
        rule: &SubstringRule,
        event: &LogEventDbModel,
    ) -> Result<bool, RuleEvalError> {
        let missing = |field| RuleEvalError::MissingField {
            id: event.id,
            field,
        };
        let message = event.message.as_deref().ok_or(missing("message"))?;
        let nick = event.nick.as_deref().ok_or(missing("nick"))?;

        let fold = CaseFold {
            case_sensitive: rule.case_sensitive,
        };
        let message_cmp = fold.apply(message);

        // Any single not_if condition suppresses the rule.
        if Self::any_condition_holds(&rule.not_if, event, &message_cmp, fold) {
            return Ok(false);
        }

        if !Self::all_conditions_hold(&rule.only_if, event, &message_cmp, fold) {
            return Ok(false);
        }

        let pattern_cmp = fold.apply(&rule.pattern);
        if !message_cmp.contains(pattern_cmp.as_ref()) {
            return Ok(false);
        }

        // A nick containing the hotword would otherwise notify on its own messages.
        let nick_cmp = fold.apply(nick);
        Ok(!nick_cmp.contains(pattern_cmp.as_ref()))
    }

    fn any_condition_holds(
        conditions: &Conditions,
        event: &LogEventDbModel,
        message_cmp: &str,
        fold: CaseFold,
    ) -> bool {
        if conditions.is_empty() {
            return false;
        }
        let contains_holds = conditions
            .contains
            .as_deref()
            .is_some_and(|text| message_cmp.contains(fold.apply(text).as_ref()));

        contains_holds
            || conditions
                .fields
                .iter()
                .any(|(key, expected)| Self::field_holds(key, expected, event, fold))
    }

    fn all_conditions_hold(
        conditions: &Conditions,
        event: &LogEventDbModel,
        message_cmp: &str,
        fold: CaseFold,
    ) -> bool {
        if conditions.is_empty() {
            return true;
        }
        let contains_holds = conditions
            .contains
            .as_deref()
            .is_none_or(|text| message_cmp.contains(fold.apply(text).as_ref()));

        contains_holds
            && conditions
                .fields
                .iter()
                .all(|(key, expected)| Self::field_holds(key, expected, event, fold))
    }

    /// Unknown field names never hold.
    fn field_holds(key: &str, expected: &Value, event: &LogEventDbModel, fold: CaseFold) -> bool {
        event
            .field(key)
            .is_some_and(|actual| fold.values_equal(expected, &actual))
    }
}
