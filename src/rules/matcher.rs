//! Single-key comparison predicates for rule conditions.
//!
//! A matcher is built from a JSON definition carrying a `key`, a
//! two-letter `matcher` code and a `values` list. Anything malformed,
//! such as an unknown code or a missing key, degrades to an
//! always-false matcher rather than failing rule registration.

use std::fmt;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    StartsWith,
    EndsWith,
    Exists,
    NotExists,
    Unknown,
}

impl MatcherKind {
    fn from_code(code: &str) -> Self {
        match code {
            "eq" => MatcherKind::Equals,
            "ne" => MatcherKind::NotEquals,
            "co" => MatcherKind::Contains,
            "nc" => MatcherKind::NotContains,
            "gt" => MatcherKind::GreaterThan,
            "ge" => MatcherKind::GreaterEqual,
            "lt" => MatcherKind::LessThan,
            "le" => MatcherKind::LessEqual,
            "sw" => MatcherKind::StartsWith,
            "ew" => MatcherKind::EndsWith,
            "ex" => MatcherKind::Exists,
            "nx" => MatcherKind::NotExists,
            _ => MatcherKind::Unknown,
        }
    }

    fn op_text(&self) -> &'static str {
        match self {
            MatcherKind::Equals => "EQUALS",
            MatcherKind::NotEquals => "NOT EQUALS",
            MatcherKind::Contains => "CONTAINS",
            MatcherKind::NotContains => "NOT CONTAINS",
            MatcherKind::GreaterThan => "GREATER THAN",
            MatcherKind::GreaterEqual => "GREATER THAN OR EQUALS",
            MatcherKind::LessThan => "LESS THAN",
            MatcherKind::LessEqual => "LESS THAN OR EQUALS",
            MatcherKind::StartsWith => "STARTS WITH",
            MatcherKind::EndsWith => "ENDS WITH",
            MatcherKind::Exists => "EXISTS",
            MatcherKind::NotExists => "NOT EXISTS",
            MatcherKind::Unknown => "UNKNOWN",
        }
    }
}

/// A single-key predicate over an observed payload value.
#[derive(Debug, Clone, PartialEq)]
pub struct Matcher {
    pub key: String,
    pub kind: MatcherKind,
    pub values: Vec<Value>,
}

impl Matcher {
    pub fn new(key: impl Into<String>, kind: MatcherKind, values: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            kind,
            values,
        }
    }

    /// Builds a matcher from its JSON definition. Malformed definitions
    /// yield the never-matching `Unknown` kind.
    pub fn from_json(definition: &serde_json::Value) -> Self {
        let key = definition
            .get("key")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let kind = match definition.get("matcher").and_then(|v| v.as_str()) {
            Some(code) if !key.is_empty() => MatcherKind::from_code(code),
            _ => MatcherKind::Unknown,
        };
        let values = definition
            .get("values")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().cloned().map(Value::from).collect())
            .unwrap_or_default();
        Self { key, kind, values }
    }

    /// Evaluates the predicate against the value resolved for `key`
    /// (`None` when the key is absent from the payload). Never panics;
    /// operands that cannot be compared simply fail the match.
    pub fn matches(&self, observed: Option<&Value>) -> bool {
        match self.kind {
            MatcherKind::Exists => observed.is_some(),
            MatcherKind::NotExists => observed.is_none(),
            MatcherKind::Unknown => false,
            _ => {
                let Some(observed) = observed else {
                    return false;
                };
                match self.kind {
                    MatcherKind::Equals => {
                        self.values.iter().any(|v| values_equal(observed, v))
                    }
                    // True only if ALL candidate values differ.
                    MatcherKind::NotEquals => {
                        !self.values.iter().any(|v| values_equal(observed, v))
                    }
                    MatcherKind::Contains => self
                        .values
                        .iter()
                        .any(|v| text_of(observed).contains(&text_of(v))),
                    // True only if the value is contained in none of them.
                    MatcherKind::NotContains => !self
                        .values
                        .iter()
                        .any(|v| text_of(observed).contains(&text_of(v))),
                    MatcherKind::StartsWith => self
                        .values
                        .iter()
                        .any(|v| text_of(observed).starts_with(&text_of(v))),
                    MatcherKind::EndsWith => self
                        .values
                        .iter()
                        .any(|v| text_of(observed).ends_with(&text_of(v))),
                    MatcherKind::GreaterThan => self.numeric_any(observed, |a, b| a > b),
                    MatcherKind::GreaterEqual => self.numeric_any(observed, |a, b| a >= b),
                    MatcherKind::LessThan => self.numeric_any(observed, |a, b| a < b),
                    MatcherKind::LessEqual => self.numeric_any(observed, |a, b| a <= b),
                    _ => false,
                }
            }
        }
    }

    fn numeric_any(&self, observed: &Value, cmp: fn(f64, f64) -> bool) -> bool {
        let Some(left) = observed.to_number() else {
            return false;
        };
        self.values
            .iter()
            .any(|v| v.to_number().is_some_and(|right| cmp(left, right)))
    }
}

/// Case-folded textual form used by the substring-family matchers.
/// Numeric values are stringified in their natural decimal form first.
fn text_of(value: &Value) -> String {
    value.to_string().to_lowercase()
}

/// Equality with the coercion quirks the rules format mandates:
/// case-insensitive for text, numeric when both sides reduce to
/// numbers, and booleans accept `true`/`false`/`1`/`0` (any case) but
/// never floating-point `1.0`/`0.0`.
fn values_equal(observed: &Value, candidate: &Value) -> bool {
    if let Value::Bool(b) = observed {
        return bool_matches(*b, candidate);
    }
    if let Value::Bool(b) = candidate {
        return bool_matches(*b, observed);
    }
    if let (Some(a), Some(b)) = (observed.to_number(), candidate.to_number()) {
        return a == b;
    }
    text_of(observed) == text_of(candidate)
}

fn bool_matches(expected: bool, other: &Value) -> bool {
    match other {
        Value::Bool(b) => *b == expected,
        Value::Int(i) => *i == i32::from(expected),
        Value::Long(l) => *l == i64::from(expected),
        // Floats are type-strict: 1.0 is not true, 0.0 is not false.
        Value::Double(_) => false,
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "1" => expected,
            "false" | "0" => !expected,
            _ => false,
        },
        _ => false,
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MatcherKind::Exists | MatcherKind::NotExists => {
                write!(f, "({} {})", self.key, self.kind.op_text())
            }
            _ => {
                let clauses: Vec<String> = self
                    .values
                    .iter()
                    .map(|v| format!("{} {} {}", self.key, self.kind.op_text(), v))
                    .collect();
                write!(f, "({})", clauses.join(" OR "))
            }
        }
    }
}
