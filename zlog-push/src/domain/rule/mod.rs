//! Hotword rules: typed definitions, evaluation and per-run loading.

pub mod book;
pub mod evaluator;
pub mod loader;
pub mod types;

pub use book::RuleBook;
pub use evaluator::{RuleEvalError, RuleEvaluator};
pub use loader::{RuleSetError, RuleSetLoader};
pub use types::{Conditions, Rule, RuleValidationError, SubstringRule};
