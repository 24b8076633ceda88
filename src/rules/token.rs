//! `{%key%}` token expansion and payload path lookup.
//!
//! Rule condition keys and consequence details may reference the
//! triggering event's payload through dotted paths with `[index]` and
//! `[*]` list segments, and may embed `{%...%}` placeholders in string
//! values. Placeholders resolve against the event payload, a few
//! event attributes (`~type`, `~source`, `~timestampu`) and named
//! shared-state lookups (`~state.<module>/key`), substituting the
//! literal textual form of the resolved value. Unresolvable tokens are
//! left in place.

use std::sync::OnceLock;

use regex::Regex;

use crate::event::Event;
use crate::event_data::EventData;
use crate::hub::shared_state::{SharedStateStore, StateStream};
use crate::value::Value;

const STATE_TOKEN_PREFIX: &str = "~state.";
const TYPE_TOKEN: &str = "~type";
const SOURCE_TOKEN: &str = "~source";
const TIMESTAMP_TOKEN: &str = "~timestampu";

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{%([^%{}]+)%\}").unwrap_or_else(|_| unreachable!()))
}

enum Segment<'a> {
    Key(&'a str),
    Index(&'a str, usize),
    Wildcard(&'a str),
}

fn parse_segment(segment: &str) -> Segment<'_> {
    if let Some(open) = segment.find('[') {
        if let Some(inner) = segment[open..].strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let name = &segment[..open];
            if inner == "*" {
                return Segment::Wildcard(name);
            }
            if let Ok(index) = inner.parse::<usize>() {
                return Segment::Index(name, index);
            }
        }
    }
    Segment::Key(segment)
}

/// Resolves a dotted path into a payload, fanning out across `[*]`
/// list segments. The result holds every value the path reaches, and
/// is empty when the path dead-ends.
pub fn resolve_path(data: &EventData, path: &str) -> Vec<Value> {
    if path.is_empty() {
        return Vec::new();
    }
    let mut current = vec![Value::Map(data.as_map().clone())];
    for raw in path.split('.') {
        let segment = parse_segment(raw);
        let mut next = Vec::new();
        for value in &current {
            let Value::Map(map) = value else { continue };
            match segment {
                Segment::Key(name) => {
                    if let Some(v) = map.get(name) {
                        next.push(v.clone());
                    }
                }
                Segment::Index(name, index) => {
                    if let Some(Value::List(items)) = map.get(name) {
                        if let Some(v) = items.get(index) {
                            next.push(v.clone());
                        }
                    }
                }
                Segment::Wildcard(name) => {
                    if let Some(Value::List(items)) = map.get(name) {
                        next.extend(items.iter().cloned());
                    }
                }
            }
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }
    current
}

/// Expands placeholders against one triggering event plus the shared
/// state store.
pub struct TokenExpander<'a> {
    event: &'a Event,
    states: &'a SharedStateStore,
}

impl<'a> TokenExpander<'a> {
    pub fn new(event: &'a Event, states: &'a SharedStateStore) -> Self {
        Self { event, states }
    }

    /// Resolves a single token to a value, without the `{% %}` fence.
    pub fn resolve_token(&self, token: &str) -> Option<Value> {
        if let Some(rest) = token.strip_prefix(STATE_TOKEN_PREFIX) {
            let (module, path) = rest.split_once('/')?;
            let state = self
                .states
                .resolve(module, Some(self.event.event_number()), StateStream::Standard)?;
            let data = state.data()?;
            return resolve_path(data, path).into_iter().next();
        }
        match token {
            TYPE_TOKEN => Some(Value::String(self.event.event_type().to_string())),
            SOURCE_TOKEN => Some(Value::String(self.event.source().to_string())),
            TIMESTAMP_TOKEN => Some(Value::Long(self.event.timestamp().timestamp())),
            path => resolve_path(self.event.data(), path).into_iter().next(),
        }
    }

    /// Replaces every `{%token%}` in `input` with the literal textual
    /// form of its resolution. Tokens that resolve to nothing stay
    /// verbatim.
    pub fn expand_str(&self, input: &str) -> String {
        token_pattern()
            .replace_all(input, |captures: &regex::Captures<'_>| {
                let token = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                match self.resolve_token(token.trim()) {
                    Some(value) => value.to_string(),
                    None => captures
                        .get(0)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                }
            })
            .to_string()
    }

    /// Walks a payload tree and expands placeholders in every string
    /// value, leaving all other kinds untouched.
    pub fn expand_data(&self, data: &EventData) -> EventData {
        let mut expanded = EventData::new();
        for (key, value) in data.as_map() {
            expanded.put(key.clone(), self.expand_value(value));
        }
        expanded
    }

    fn expand_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.expand_str(s)),
            Value::List(items) => {
                Value::List(items.iter().map(|v| self.expand_value(v)).collect())
            }
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.expand_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}
