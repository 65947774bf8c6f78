//! Offline rule-based responder.
//!
//! [`RuleEngine`] answers arithmetic, scientific function calls, unit
//! conversions and small talk without any network access. It never fails: the
//! last matcher in the default chain always produces a reply.

mod engine;
mod evaluator;
mod scientific;
mod units;

pub use engine::{RuleAnswer, RuleEngine, RuleMatcher};
pub use evaluator::{evaluate, format_number, EvalError};
pub use scientific::apply_function;
