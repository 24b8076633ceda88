//! # Value
//!
//! The universal payload representation used throughout the SDK core.
//! Every event payload, shared-state snapshot and rule operand is built
//! from `Value` instances. The type is a discriminated variant over the
//! primitive kinds a host application can hand us, plus nested maps and
//! lists.
//!
//! A "null" is always an explicit [`Value::Null`], never an absent key.
//! Callers that need to distinguish "missing" from "null" do so at the
//! container level.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed payload value.
///
/// Numeric kinds interconvert on read where the conversion is exact
/// (an `Int` can be read as a `Long` or `Double`; a fraction-less
/// `Double` can be read back as a `Long`). Everything else is
/// kind-strict: reading a `String` as a `Bool` fails with
/// [`ValueError::KindMismatch`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    String(String),
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("value kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

pub type ValueResult<T> = Result<T, ValueError>;

impl Value {
    /// Name of the concrete kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    fn mismatch(&self, expected: &'static str) -> ValueError {
        ValueError::KindMismatch {
            expected,
            actual: self.kind(),
        }
    }

    pub fn as_string(&self) -> ValueResult<&str> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_bool(&self) -> ValueResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_int(&self) -> ValueResult<i32> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Long(l) => i32::try_from(*l).map_err(|_| self.mismatch("int")),
            Value::Double(d) if d.fract() == 0.0 && *d >= i32::MIN as f64 && *d <= i32::MAX as f64 => {
                Ok(*d as i32)
            }
            other => Err(other.mismatch("int")),
        }
    }

    pub fn as_long(&self) -> ValueResult<i64> {
        match self {
            Value::Int(i) => Ok(*i as i64),
            Value::Long(l) => Ok(*l),
            Value::Double(d) if d.fract() == 0.0 && d.abs() < 2f64.powi(53) => Ok(*d as i64),
            other => Err(other.mismatch("long")),
        }
    }

    pub fn as_double(&self) -> ValueResult<f64> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Long(l) => Ok(*l as f64),
            Value::Double(d) => Ok(*d),
            other => Err(other.mismatch("double")),
        }
    }

    pub fn as_list(&self) -> ValueResult<&[Value]> {
        match self {
            Value::List(l) => Ok(l),
            other => Err(other.mismatch("list")),
        }
    }

    pub fn as_map(&self) -> ValueResult<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(other.mismatch("map")),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Best-effort numeric reading used by the rules matchers. Strings
    /// that parse as a decimal number count as numeric here; booleans
    /// and containers do not.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Long(l) => Some(*l as f64),
            Value::Double(d) => Some(*d),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

/// Renders the bare textual form of a scalar: strings unquoted, numbers
/// in their natural decimal form, booleans as `true`/`false`, null as
/// the empty string. Lists and maps render in their JSON-like form.
/// This is the representation token expansion substitutes and the hash
/// canonicalization builds on.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::String(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}", l),
            Value::Double(d) => write!(f, "{}", d),
            Value::List(_) | Value::Map(_) => write!(f, "{}", self.render_literal()),
        }
    }
}

impl Value {
    /// JSON-like literal rendering used inside list/object nesting:
    /// string values double-quoted, numeric and boolean values bare,
    /// object keys sorted for determinism.
    pub(crate) fn render_literal(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::String(s) => format!("\"{}\"", s),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Long(l) => l.to_string(),
            Value::Double(d) => d.to_string(),
            Value::List(items) => {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        // Primitive list elements render bare, maps keep
                        // their quoted-object form.
                        Value::Map(_) | Value::List(_) => v.render_literal(),
                        other => other.to_string(),
                    })
                    .collect();
                format!("[{}]", rendered.join(","))
            }
            Value::Map(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let rendered: Vec<String> = keys
                    .iter()
                    .map(|k| format!("\"{}\":{}", k, map[*k].render_literal()))
                    .collect();
                format!("{{{}}}", rendered.join(","))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(value: HashMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                        Value::Int(i as i32)
                    } else {
                        Value::Long(i)
                    }
                } else {
                    Value::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}
