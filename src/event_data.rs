//! # EventData
//!
//! The payload container carried by every [`crate::event::Event`]. A map
//! from string keys to [`Value`] with typed accessors in two flavors:
//! `get_*` which fail loudly (missing key or kind mismatch) and `opt_*`
//! which never fail and hand back a caller-supplied fallback.
//!
//! The container also provides the canonical FNV-1a hash used for
//! payload fingerprinting, computed over a deterministic ASCII-sorted
//! flattening so that insertion order never affects the result.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{Value, ValueError};

const FNV1A_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV1A_PRIME: u32 = 0x0100_0193;

#[derive(Debug, Error)]
pub enum EventDataError {
    #[error("key not found: {key}")]
    KeyNotFound { key: String },
    #[error("value error for key {key}: {source}")]
    Value {
        key: String,
        #[source]
        source: ValueError,
    },
}

pub type EventDataResult<T> = Result<T, EventDataError>;

/// Key→value payload map.
///
/// Cloning produces a fully independent deep copy; mutating either side
/// afterwards never affects the other (values own their nested maps and
/// lists).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventData {
    values: HashMap<String, Value>,
}

impl EventData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds from an existing map. A `Value::Null` entry is stored as
    /// the explicit null kind, never dropped.
    pub fn from_map(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn as_map(&self) -> &HashMap<String, Value> {
        &self.values
    }

    pub(crate) fn as_map_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.values
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.put(key, Value::String(value.into()))
    }

    pub fn put_bool(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.put(key, Value::Bool(value))
    }

    pub fn put_int(&mut self, key: impl Into<String>, value: i32) -> &mut Self {
        self.put(key, Value::Int(value))
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.put(key, Value::Long(value))
    }

    pub fn put_double(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        self.put(key, Value::Double(value))
    }

    pub fn put_null(&mut self, key: impl Into<String>) -> &mut Self {
        self.put(key, Value::Null)
    }

    pub fn put_map(&mut self, key: impl Into<String>, value: HashMap<String, Value>) -> &mut Self {
        self.put(key, Value::Map(value))
    }

    pub fn put_list(&mut self, key: impl Into<String>, value: Vec<Value>) -> &mut Self {
        self.put(key, Value::List(value))
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn get(&self, key: &str) -> EventDataResult<&Value> {
        self.values.get(key).ok_or_else(|| EventDataError::KeyNotFound {
            key: key.to_string(),
        })
    }

    pub fn opt(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_string(&self, key: &str) -> EventDataResult<String> {
        self.get(key)?
            .as_string()
            .map(|s| s.to_string())
            .map_err(|source| EventDataError::Value {
                key: key.to_string(),
                source,
            })
    }

    pub fn get_bool(&self, key: &str) -> EventDataResult<bool> {
        self.get(key)?
            .as_bool()
            .map_err(|source| EventDataError::Value {
                key: key.to_string(),
                source,
            })
    }

    pub fn get_int(&self, key: &str) -> EventDataResult<i32> {
        self.get(key)?
            .as_int()
            .map_err(|source| EventDataError::Value {
                key: key.to_string(),
                source,
            })
    }

    pub fn get_long(&self, key: &str) -> EventDataResult<i64> {
        self.get(key)?
            .as_long()
            .map_err(|source| EventDataError::Value {
                key: key.to_string(),
                source,
            })
    }

    pub fn get_double(&self, key: &str) -> EventDataResult<f64> {
        self.get(key)?
            .as_double()
            .map_err(|source| EventDataError::Value {
                key: key.to_string(),
                source,
            })
    }

    pub fn get_map(&self, key: &str) -> EventDataResult<&HashMap<String, Value>> {
        self.get(key)?
            .as_map()
            .map_err(|source| EventDataError::Value {
                key: key.to_string(),
                source,
            })
    }

    pub fn get_list(&self, key: &str) -> EventDataResult<&[Value]> {
        self.get(key)?
            .as_list()
            .map_err(|source| EventDataError::Value {
                key: key.to_string(),
                source,
            })
    }

    pub fn opt_string(&self, key: &str, fallback: &str) -> String {
        self.opt(key)
            .and_then(|v| v.as_string().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn opt_bool(&self, key: &str, fallback: bool) -> bool {
        self.opt(key).and_then(|v| v.as_bool().ok()).unwrap_or(fallback)
    }

    pub fn opt_int(&self, key: &str, fallback: i32) -> i32 {
        self.opt(key).and_then(|v| v.as_int().ok()).unwrap_or(fallback)
    }

    pub fn opt_long(&self, key: &str, fallback: i64) -> i64 {
        self.opt(key).and_then(|v| v.as_long().ok()).unwrap_or(fallback)
    }

    pub fn opt_double(&self, key: &str, fallback: f64) -> f64 {
        self.opt(key).and_then(|v| v.as_double().ok()).unwrap_or(fallback)
    }

    /// Canonical 32-bit FNV-1a hash of the payload, widened to `u64`.
    ///
    /// The payload is flattened to a single string before hashing:
    /// top-level and nested map keys are visited in ASCII ascending
    /// order (case-sensitive, so `Z` sorts before `a`), nested maps
    /// contribute dotted `parent.child:value` segments, lists render in
    /// their JSON-like literal form and segments are concatenated with
    /// no separator. When `mask` is given, only keys present in both
    /// the payload and the mask participate; an empty effective key set
    /// hashes to `0`.
    pub fn fnv1a_hash(&self, mask: Option<&[&str]>) -> u64 {
        let mut keys: Vec<&String> = match mask {
            Some(mask) => self
                .values
                .keys()
                .filter(|k| mask.contains(&k.as_str()))
                .collect(),
            None => self.values.keys().collect(),
        };
        if keys.is_empty() {
            return 0;
        }
        keys.sort();

        let mut flattened = String::new();
        for key in keys {
            flatten_value(key, &self.values[key], &mut flattened);
        }
        fnv1a_32(&flattened) as u64
    }
}

impl From<HashMap<String, Value>> for EventData {
    fn from(values: HashMap<String, Value>) -> Self {
        Self::from_map(values)
    }
}

fn flatten_value(prefix: &str, value: &Value, out: &mut String) {
    match value {
        Value::Map(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                let nested = format!("{}.{}", prefix, key);
                flatten_value(&nested, &map[key], out);
            }
        }
        other => {
            out.push_str(prefix);
            out.push(':');
            out.push_str(&other.to_string());
        }
    }
}

fn fnv1a_32(input: &str) -> u32 {
    let mut hash = FNV1A_OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}
