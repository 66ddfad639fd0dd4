//! Typed hotword rules and their validation.
//!
//! Rules are stored as loosely shaped JSON objects. They are validated once,
//! at load time, into the closed [`Rule`] representation; evaluation never
//! sees an unknown rule type or a malformed guard.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Wire name of substring rules.
pub const SUBSTRING_TYPE: &str = "substring";
/// Wire name of private message rules.
pub const PRIVATE_MESSAGE_TYPE: &str = "pm";

/// Reserved guard key meaning "the message contains this text".
pub const CONTAINS_KEY: &str = "contains";

/// Reasons a single rule definition is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleValidationError {
    #[error("rule is not an object")]
    NotAnObject,

    #[error("rule has no 'type'")]
    MissingType,

    #[error("unsupported rule type: {0}")]
    UnknownType(String),

    #[error("substring rule has no 'match'")]
    MissingMatch,

    #[error("'match' is not a string")]
    MatchNotString,

    #[error("'case_sensitive' is not a bool")]
    CaseSensitiveNotBool,

    #[error("'{0}' is not an object")]
    ConditionsNotObject(&'static str),

    #[error("'{0}.contains' is not a string")]
    ContainsNotString(&'static str),
}

/// Guard conditions of a substring rule (`only_if` / `not_if`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    /// Text the message must contain.
    pub contains: Option<String>,
    /// Event field name to required value.
    pub fields: BTreeMap<String, Value>,
}

impl Conditions {
    pub fn is_empty(&self) -> bool {
        self.contains.is_none() && self.fields.is_empty()
    }

    pub fn contains(mut self, text: impl Into<String>) -> Self {
        self.contains = Some(text.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    fn parse(name: &'static str, value: &Value) -> Result<Self, RuleValidationError> {
        let Value::Object(map) = value else {
            return Err(RuleValidationError::ConditionsNotObject(name));
        };

        let mut conditions = Self::default();
        for (key, value) in map {
            if key == CONTAINS_KEY {
                let text = value
                    .as_str()
                    .ok_or(RuleValidationError::ContainsNotString(name))?;
                conditions.contains = Some(text.to_string());
            } else {
                conditions.fields.insert(key.clone(), value.clone());
            }
        }
        Ok(conditions)
    }
}

/// Substring rule: fires when the message contains `pattern`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstringRule {
    /// Literal text to look for (`match` on the wire).
    pub pattern: String,
    pub case_sensitive: bool,
    pub only_if: Conditions,
    pub not_if: Conditions,
}

impl SubstringRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            case_sensitive: false,
            only_if: Conditions::default(),
            not_if: Conditions::default(),
        }
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn only_if(mut self, conditions: Conditions) -> Self {
        self.only_if = conditions;
        self
    }

    pub fn not_if(mut self, conditions: Conditions) -> Self {
        self.not_if = conditions;
        self
    }
}

/// A recipient's notification rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Fires on any message in a direct conversation.
    PrivateMessage,
    /// Fires when the message contains a text fragment.
    Substring(SubstringRule),
}

impl Rule {
    /// Validate one raw JSON rule definition.
    pub fn parse(value: &Value) -> Result<Self, RuleValidationError> {
        let Value::Object(obj) = value else {
            return Err(RuleValidationError::NotAnObject);
        };

        let rule_type = obj.get("type").ok_or(RuleValidationError::MissingType)?;
        match rule_type.as_str() {
            Some(SUBSTRING_TYPE) => Self::parse_substring(obj).map(Self::Substring),
            Some(PRIVATE_MESSAGE_TYPE) => {
                // Other fields are ignored but must still be well formed.
                Self::parse_substring_fields(obj)?;
                Ok(Self::PrivateMessage)
            }
            Some(other) => Err(RuleValidationError::UnknownType(other.to_string())),
            None => Err(RuleValidationError::UnknownType(rule_type.to_string())),
        }
    }

    fn parse_substring(obj: &Map<String, Value>) -> Result<SubstringRule, RuleValidationError> {
        let pattern = match obj.get("match") {
            None => return Err(RuleValidationError::MissingMatch),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(RuleValidationError::MatchNotString),
        };
        let (case_sensitive, only_if, not_if) = Self::parse_substring_fields(obj)?;

        Ok(SubstringRule {
            pattern,
            case_sensitive,
            only_if,
            not_if,
        })
    }

    fn parse_substring_fields(
        obj: &Map<String, Value>,
    ) -> Result<(bool, Conditions, Conditions), RuleValidationError> {
        if obj.get("match").is_some_and(|m| !m.is_string()) {
            return Err(RuleValidationError::MatchNotString);
        }

        let case_sensitive = match obj.get("case_sensitive") {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(RuleValidationError::CaseSensitiveNotBool),
        };

        let only_if = obj
            .get("only_if")
            .map(|v| Conditions::parse("only_if", v))
            .transpose()?
            .unwrap_or_default();
        let not_if = obj
            .get("not_if")
            .map(|v| Conditions::parse("not_if", v))
            .transpose()?
            .unwrap_or_default();

        Ok((case_sensitive, only_if, not_if))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PrivateMessage => PRIVATE_MESSAGE_TYPE,
            Self::Substring(_) => SUBSTRING_TYPE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_minimal_substring() {
        let raw = json!({"type": "substring", "match": "coffee"});
        let rule = Rule::parse(&raw).unwrap();
        assert_eq!(rule, Rule::Substring(SubstringRule::new("coffee")));
    }

    #[test]
    fn test_parse_full_substring() {
        let rule = Rule::parse(&json!({
            "type": "substring",
            "match": "deploy",
            "case_sensitive": true,
            "only_if": {"network": "libera", "contains": "prod"},
            "not_if": {"nick": "ci-bot"}
        }))
        .unwrap();

        let only_if = Conditions::default()
            .contains("prod")
            .field("network", "libera");
        let expected = SubstringRule::new("deploy")
            .case_sensitive(true)
            .only_if(only_if)
            .not_if(Conditions::default().field("nick", "ci-bot"));
        assert_eq!(rule, Rule::Substring(expected));
    }

    #[test]
    fn test_parse_pm_without_match() {
        for raw in [json!({"type": "pm"}), json!({"type": "pm", "match": ""})] {
            assert_eq!(Rule::parse(&raw), Ok(Rule::PrivateMessage), "input: {raw}");
        }
    }

    #[test]
    fn test_rejects_malformed_rules() {
        let cases = [
            (json!("substring"), RuleValidationError::NotAnObject),
            (json!({"match": "x"}), RuleValidationError::MissingType),
            (
                json!({"type": "regex", "match": "x"}),
                RuleValidationError::UnknownType("regex".into()),
            ),
            (
                json!({"type": "substring"}),
                RuleValidationError::MissingMatch,
            ),
            (
                json!({"type": "substring", "match": 5}),
                RuleValidationError::MatchNotString,
            ),
            (
                json!({"type": "substring", "match": "x", "case_sensitive": "yes"}),
                RuleValidationError::CaseSensitiveNotBool,
            ),
            (
                json!({"type": "substring", "match": "x", "only_if": ["network"]}),
                RuleValidationError::ConditionsNotObject("only_if"),
            ),
            (
                json!({"type": "substring", "match": "x", "not_if": {"contains": 1}}),
                RuleValidationError::ContainsNotString("not_if"),
            ),
            (
                json!({"type": "pm", "case_sensitive": 1}),
                RuleValidationError::CaseSensitiveNotBool,
            ),
        ];

        for (raw, expected) in cases {
            assert_eq!(Rule::parse(&raw), Err(expected), "input: {raw}");
        }
    }
}
