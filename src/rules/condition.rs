//! Boolean-composable rule condition trees.
//!
//! Conditions come in two JSON flavors: a `matcher` leaf and a `group`
//! combining child conditions under `and`/`or` logic. A malformed
//! definition degrades to a never-matching condition so that one bad
//! rule cannot poison the rest of a rule set.

use tracing::debug;

use crate::event::Event;
use crate::hub::shared_state::SharedStateStore;
use crate::rules::matcher::{Matcher, MatcherKind};
use crate::rules::token::{resolve_path, TokenExpander};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLogic {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleCondition {
    Matcher(Matcher),
    Group {
        logic: GroupLogic,
        conditions: Vec<RuleCondition>,
    },
    /// Degraded form of an unparseable definition.
    Never,
}

impl RuleCondition {
    /// Parses a condition tree from its JSON definition. Unknown
    /// `type` tags or missing definitions degrade to [`RuleCondition::Never`].
    pub fn from_json(definition: &serde_json::Value) -> Self {
        let Some(kind) = definition.get("type").and_then(|v| v.as_str()) else {
            debug!("rule condition missing type tag, degrading to never-match");
            return RuleCondition::Never;
        };
        let Some(detail) = definition.get("definition") else {
            debug!(kind, "rule condition missing definition, degrading to never-match");
            return RuleCondition::Never;
        };
        match kind {
            "matcher" => RuleCondition::Matcher(Matcher::from_json(detail)),
            "group" => {
                let logic = match detail.get("logic").and_then(|v| v.as_str()) {
                    Some("and") => GroupLogic::And,
                    Some("or") => GroupLogic::Or,
                    _ => {
                        debug!("rule condition group with unknown logic, degrading to never-match");
                        return RuleCondition::Never;
                    }
                };
                let conditions = detail
                    .get("conditions")
                    .and_then(|v| v.as_array())
                    .map(|items| items.iter().map(RuleCondition::from_json).collect())
                    .unwrap_or_default();
                RuleCondition::Group { logic, conditions }
            }
            other => {
                debug!(kind = other, "unknown rule condition type, degrading to never-match");
                RuleCondition::Never
            }
        }
    }

    /// Evaluates against a triggering event, token-expanding matcher
    /// keys and operands first.
    pub fn evaluate(&self, event: &Event, states: &SharedStateStore) -> bool {
        match self {
            RuleCondition::Never => false,
            RuleCondition::Group { logic, conditions } => {
                if conditions.is_empty() {
                    return false;
                }
                match logic {
                    GroupLogic::And => conditions.iter().all(|c| c.evaluate(event, states)),
                    GroupLogic::Or => conditions.iter().any(|c| c.evaluate(event, states)),
                }
            }
            RuleCondition::Matcher(matcher) => {
                let expander = TokenExpander::new(event, states);
                let key = expander.expand_str(&matcher.key);
                let values: Vec<Value> = matcher
                    .values
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => Value::String(expander.expand_str(s)),
                        other => other.clone(),
                    })
                    .collect();
                let expanded = Matcher::new(key.clone(), matcher.kind, values);

                let observed = resolve_path(event.data(), &key);
                if observed.is_empty() {
                    return expanded.matches(None);
                }
                if expanded.kind == MatcherKind::Exists {
                    return true;
                }
                observed.iter().any(|v| expanded.matches(Some(v)))
            }
        }
    }
}
