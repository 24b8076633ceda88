//! Rules engine: conditions, matchers, token expansion and
//! consequence execution.
//!
//! Rule sets are registered per module and evaluated against every
//! event flowing through the hub. A rule is a boolean condition tree
//! ([`condition::RuleCondition`]) over payload lookups
//! ([`matcher::Matcher`]) plus a list of consequence template events;
//! [`engine::RulesEngine`] runs the whole pipeline, including `{%token%}`
//! expansion ([`token::TokenExpander`]) and dispatch-chain loop
//! protection.

pub mod condition;
pub mod engine;
pub mod matcher;
pub mod token;

pub use condition::{GroupLogic, RuleCondition};
pub use engine::{Rule, RulesEngine};
pub use matcher::{Matcher, MatcherKind};
pub use token::TokenExpander;
