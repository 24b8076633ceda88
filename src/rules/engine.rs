//! Rule evaluation and consequence processing.
//!
//! The engine holds one rule queue per registered module (replaced
//! wholesale when configuration reloads) and is driven from the hub's
//! delivery path: every dispatched event is evaluated against every
//! queue, matching rules execute their consequences in order, and any
//! dispatch-type consequences come back to the hub as freshly minted
//! events.
//!
//! Dispatch consequences are bounded by a per-event chain depth so a
//! rule that re-dispatches a copy of its own triggering event cannot
//! loop forever. Malformed rules and consequences are debug-logged
//! no-ops; they never abort evaluation of sibling rules.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::event::{Event, EventSource, EventType};
use crate::event_data::EventData;
use crate::hub::shared_state::SharedStateStore;
use crate::rules::condition::RuleCondition;
use crate::rules::token::TokenExpander;
use crate::value::Value;

/// Payload key under which a consequence template carries its
/// definition.
pub const CONSEQUENCE_KEY: &str = "triggeredconsequence";

const CONSEQUENCE_TYPE_ATTACH: &str = "add";
const CONSEQUENCE_TYPE_MODIFY: &str = "mod";
const CONSEQUENCE_TYPE_DISPATCH: &str = "dispatch";

const DISPATCH_ACTION_COPY: &str = "copy";
const DISPATCH_ACTION_NEW: &str = "new";

const WILDCARD_SUFFIX: &str = "[*]";

/// A condition plus an ordered list of consequence-event templates.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub condition: RuleCondition,
    pub consequence_events: Vec<Event>,
}

impl Rule {
    pub fn new(condition: RuleCondition, consequence_events: Vec<Event>) -> Option<Self> {
        if consequence_events.is_empty() {
            return None;
        }
        Some(Self {
            condition,
            consequence_events,
        })
    }

    /// Parses a rule from its JSON definition:
    /// `{"condition": {...}, "consequences": [{"id", "type", "detail"}]}`.
    /// A rule without any usable consequence is dead and yields `None`.
    pub fn from_json(definition: &serde_json::Value) -> Option<Self> {
        let condition = definition
            .get("condition")
            .map(RuleCondition::from_json)
            .unwrap_or(RuleCondition::Never);

        let consequences = definition
            .get("consequences")
            .and_then(|v| v.as_array())?
            .iter()
            .filter_map(consequence_template)
            .collect::<Vec<_>>();

        Rule::new(condition, consequences)
    }
}

/// Builds the template event for one consequence definition. Missing
/// id or type makes the consequence unusable.
fn consequence_template(definition: &serde_json::Value) -> Option<Event> {
    let id = definition.get("id").and_then(|v| v.as_str())?;
    let consequence_type = definition.get("type").and_then(|v| v.as_str())?;
    let detail = definition
        .get("detail")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    let mut consequence = HashMap::new();
    consequence.insert("id".to_string(), Value::from(id));
    consequence.insert("type".to_string(), Value::from(consequence_type));
    consequence.insert("detail".to_string(), Value::from(detail));

    let mut data = EventData::new();
    data.put_map(CONSEQUENCE_KEY, consequence);

    Some(
        Event::builder("triggered consequence", EventType::RulesEngine, EventSource::ResponseContent)
            .data(data)
            .build(),
    )
}

struct Consequence {
    id: String,
    consequence_type: String,
    detail: EventData,
}

/// Per-module rule queues plus the chain-depth bookkeeping for
/// dispatch consequences.
pub struct RulesEngine {
    rules: DashMap<String, Vec<Rule>>,
    chain: DashMap<Uuid, u32>,
    max_chained_events: u32,
}

impl RulesEngine {
    pub fn new(max_chained_events: u32) -> Self {
        Self {
            rules: DashMap::new(),
            chain: DashMap::new(),
            max_chained_events,
        }
    }

    /// Replaces a module's rule queue wholesale.
    pub fn replace_rules(&self, module: &str, rules: Vec<Rule>) {
        self.rules.insert(module.to_string(), rules);
    }

    pub fn unregister_rules(&self, module: &str) {
        self.rules.remove(module);
    }

    pub fn rule_count(&self, module: &str) -> usize {
        self.rules.get(module).map(|r| r.len()).unwrap_or(0)
    }

    /// Evaluates every registered rule against the triggering event.
    /// Attach/modify consequences merge into the event's payload in
    /// place; the returned events are dispatch consequences for the
    /// hub to re-inject.
    pub fn evaluate(&self, event: &mut Event, states: &SharedStateStore) -> Vec<Event> {
        let mut derived = Vec::new();

        for entry in self.rules.iter() {
            for rule in entry.value() {
                if !rule.condition.evaluate(event, states) {
                    continue;
                }
                for template in &rule.consequence_events {
                    let Some(consequence) = extract_consequence(template) else {
                        debug!("consequence template without usable definition, skipping");
                        continue;
                    };
                    self.execute_consequence(&consequence, event, states, &mut derived);
                }
            }
        }

        // An event replayed against a rule set holding no dispatch
        // consequence starts a fresh chain next time around.
        if !self.rule_set_has_dispatch() {
            self.chain.remove(&event.id());
        }

        // An event evaluated at the cap is the end of its lineage; its
        // tracking entry would otherwise outlive it for the rest of the
        // hub's life.
        let at_cap = self
            .chain
            .get(&event.id())
            .map(|d| *d >= self.max_chained_events)
            .unwrap_or(false);
        if at_cap {
            self.chain.remove(&event.id());
        }

        derived
    }

    fn execute_consequence(
        &self,
        consequence: &Consequence,
        event: &mut Event,
        states: &SharedStateStore,
        derived: &mut Vec<Event>,
    ) {
        let detail = {
            let expander = TokenExpander::new(event, states);
            expander.expand_data(&consequence.detail)
        };
        match consequence.consequence_type.as_str() {
            CONSEQUENCE_TYPE_ATTACH => {
                if let Ok(payload) = detail.get_map("eventdata") {
                    let source = payload.clone();
                    merge_maps(&source, event.data_mut().as_map_mut(), false);
                } else {
                    debug!(id = %consequence.id, "attach-data consequence without eventdata detail");
                }
            }
            CONSEQUENCE_TYPE_MODIFY => {
                if let Ok(payload) = detail.get_map("eventdata") {
                    let source = payload.clone();
                    merge_maps(&source, event.data_mut().as_map_mut(), true);
                } else {
                    debug!(id = %consequence.id, "modify-data consequence without eventdata detail");
                }
            }
            CONSEQUENCE_TYPE_DISPATCH => {
                if let Some(new_event) = self.process_dispatch(consequence, event, &detail) {
                    derived.push(new_event);
                }
            }
            other => {
                debug!(id = %consequence.id, consequence_type = other, "unhandled consequence type");
            }
        }
    }

    /// Synthesizes the new event for a dispatch consequence, or `None`
    /// when the detail is unusable or the chain depth cap is reached.
    fn process_dispatch(
        &self,
        consequence: &Consequence,
        trigger: &Event,
        detail: &EventData,
    ) -> Option<Event> {
        let depth = self.chain.get(&trigger.id()).map(|d| *d).unwrap_or(0);
        if depth >= self.max_chained_events {
            debug!(
                id = %consequence.id,
                depth,
                "dispatch consequence refused, chained event limit reached"
            );
            return None;
        }

        let Ok(type_name) = detail.get_string("type") else {
            debug!(id = %consequence.id, "dispatch consequence missing type");
            return None;
        };
        let Ok(source_name) = detail.get_string("source") else {
            debug!(id = %consequence.id, "dispatch consequence missing source");
            return None;
        };

        let data = match detail.opt_string("eventdataaction", "").as_str() {
            DISPATCH_ACTION_COPY => trigger.data().clone(),
            DISPATCH_ACTION_NEW => detail
                .get_map("eventdata")
                .map(|m| EventData::from_map(m.clone()))
                .unwrap_or_default(),
            other => {
                debug!(
                    id = %consequence.id,
                    action = other,
                    "dispatch consequence with invalid eventdataaction"
                );
                return None;
            }
        };

        // Never inherits the trigger's pair id; fresh response pairing
        // and timestamp come from the builder.
        let new_event = Event::builder(
            "dispatch consequence",
            type_name.parse().unwrap_or(EventType::Custom(type_name.clone())),
            source_name
                .parse()
                .unwrap_or(EventSource::Custom(source_name.clone())),
        )
        .data(data)
        .build();

        self.chain.insert(new_event.id(), depth + 1);
        Some(new_event)
    }

    fn rule_set_has_dispatch(&self) -> bool {
        self.rules.iter().any(|entry| {
            entry.value().iter().any(|rule| {
                rule.consequence_events.iter().any(|template| {
                    extract_consequence(template)
                        .map(|c| c.consequence_type == CONSEQUENCE_TYPE_DISPATCH)
                        .unwrap_or(false)
                })
            })
        })
    }

    #[cfg(test)]
    pub(crate) fn chain_depth(&self, event_id: Uuid) -> Option<u32> {
        self.chain.get(&event_id).map(|d| *d)
    }
}

fn extract_consequence(template: &Event) -> Option<Consequence> {
    let map = template.data().get_map(CONSEQUENCE_KEY).ok()?;
    let id = map.get("id")?.as_string().ok()?.to_string();
    let consequence_type = map.get("type")?.as_string().ok()?.to_string();
    let detail = match map.get("detail") {
        Some(Value::Map(m)) => EventData::from_map(m.clone()),
        _ => EventData::new(),
    };
    Some(Consequence {
        id,
        consequence_type,
        detail,
    })
}

/// Recursive merge used by attach-data and modify-data.
///
/// Existing plain keys in the target always win; nested maps merge
/// recursively; a `key[*]` source key fans the merge out across every
/// map element of the target's `key` list. With `delete_on_null`
/// (modify-data), a null source value removes the key at that level
/// instead of being merged in.
fn merge_maps(
    source: &HashMap<String, Value>,
    target: &mut HashMap<String, Value>,
    delete_on_null: bool,
) {
    for (key, value) in source {
        if let Some(base) = key.strip_suffix(WILDCARD_SUFFIX) {
            if let (Value::Map(nested), Some(Value::List(items))) = (value, target.get_mut(base)) {
                for item in items.iter_mut() {
                    if let Value::Map(element) = item {
                        merge_maps(nested, element, delete_on_null);
                    }
                }
            }
            continue;
        }

        if delete_on_null && value.is_null() {
            target.remove(key);
            continue;
        }

        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), value.clone());
            }
            Some(Value::Map(existing)) => {
                if let Value::Map(nested) = value {
                    merge_maps(nested, existing, delete_on_null);
                }
            }
            Some(_) => {
                // Present and not a map: the target's value stays.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn trigger_event(data: EventData) -> Event {
        Event::builder("trigger", EventType::Analytics, EventSource::RequestContent)
            .data(data)
            .build()
    }

    fn always_true_rule(consequences: serde_json::Value) -> Rule {
        Rule::from_json(&json!({
            "condition": {
                "type": "matcher",
                "definition": {"key": "key1", "matcher": "ex", "values": []}
            },
            "consequences": consequences
        }))
        .unwrap()
    }

    fn engine_with(rules: Vec<Rule>) -> RulesEngine {
        let engine = RulesEngine::new(1);
        engine.replace_rules("test_module", rules);
        engine
    }

    #[test]
    fn test_attach_data_never_overwrites() {
        let rule = always_true_rule(json!([{
            "id": "c1", "type": "add",
            "detail": {"eventdata": {"key1": "new", "newKey": "v"}}
        }]));
        let engine = engine_with(vec![rule]);
        let states = SharedStateStore::new();

        let mut data = EventData::new();
        data.put_string("key1", "old");
        let mut event = trigger_event(data);

        let derived = engine.evaluate(&mut event, &states);
        assert!(derived.is_empty());
        assert_eq!(event.data().get_string("key1").unwrap(), "old");
        assert_eq!(event.data().get_string("newKey").unwrap(), "v");
    }

    #[test]
    fn test_attach_data_merges_nested_maps() {
        let rule = always_true_rule(json!([{
            "id": "c1", "type": "add",
            "detail": {"eventdata": {"nested": {"added": 1, "kept": "no"}}}
        }]));
        let engine = engine_with(vec![rule]);
        let states = SharedStateStore::new();

        let mut nested = HashMap::new();
        nested.insert("kept".to_string(), Value::from("yes"));
        let mut data = EventData::new();
        data.put_string("key1", "x").put_map("nested", nested);
        let mut event = trigger_event(data);

        engine.evaluate(&mut event, &states);
        let merged = event.data().get_map("nested").unwrap();
        assert_eq!(merged["kept"], Value::from("yes"));
        assert_eq!(merged["added"], Value::Int(1));
    }

    #[test]
    fn test_attach_data_wildcard_list_fanout() {
        let rule = always_true_rule(json!([{
            "id": "c1", "type": "add",
            "detail": {"eventdata": {"items[*]": {"tag": "t"}}}
        }]));
        let engine = engine_with(vec![rule]);
        let states = SharedStateStore::new();

        let items = vec![
            Value::Map(HashMap::from([("a".to_string(), Value::Int(1))])),
            Value::Map(HashMap::from([("tag".to_string(), Value::from("orig"))])),
        ];
        let mut data = EventData::new();
        data.put_string("key1", "x").put_list("items", items);
        let mut event = trigger_event(data);

        engine.evaluate(&mut event, &states);
        let items = event.data().get_list("items").unwrap();
        assert_eq!(items[0].as_map().unwrap()["tag"], Value::from("t"));
        // Existing element value not overwritten.
        assert_eq!(items[1].as_map().unwrap()["tag"], Value::from("orig"));
    }

    #[test]
    fn test_modify_data_null_deletes() {
        let rule = always_true_rule(json!([{
            "id": "c1", "type": "mod",
            "detail": {"eventdata": {"key1": null}}
        }]));
        let engine = engine_with(vec![rule]);
        let states = SharedStateStore::new();

        let mut data = EventData::new();
        data.put_string("key1", "old").put_string("key2", "keep");
        let mut event = trigger_event(data);

        engine.evaluate(&mut event, &states);
        assert!(!event.data().contains_key("key1"));
        assert_eq!(event.data().get_string("key2").unwrap(), "keep");
    }

    #[test]
    fn test_dispatch_copy_action() {
        let rule = always_true_rule(json!([{
            "id": "c1", "type": "dispatch",
            "detail": {"type": "analytics", "source": "responsecontent", "eventdataaction": "copy"}
        }]));
        let engine = engine_with(vec![rule]);
        let states = SharedStateStore::new();

        let mut data = EventData::new();
        data.put_string("key1", "v");
        let mut event = trigger_event(data);

        let derived = engine.evaluate(&mut event, &states);
        assert_eq!(derived.len(), 1);
        let new_event = &derived[0];
        assert_eq!(*new_event.event_type(), EventType::Analytics);
        assert_eq!(*new_event.source(), EventSource::ResponseContent);
        assert_eq!(new_event.data().get_string("key1").unwrap(), "v");
        assert!(new_event.pair_id().is_none());
        assert_ne!(new_event.response_pair_id(), event.response_pair_id());
        assert_eq!(engine.chain_depth(new_event.id()), Some(1));
    }

    #[test]
    fn test_dispatch_new_action_uses_detail_payload() {
        let rule = always_true_rule(json!([{
            "id": "c1", "type": "dispatch",
            "detail": {
                "type": "signal", "source": "requestcontent",
                "eventdataaction": "new",
                "eventdata": {"fresh": true}
            }
        }]));
        let engine = engine_with(vec![rule]);
        let states = SharedStateStore::new();

        let mut data = EventData::new();
        data.put_string("key1", "v");
        let mut event = trigger_event(data);

        let derived = engine.evaluate(&mut event, &states);
        assert_eq!(derived.len(), 1);
        assert!(derived[0].data().get_bool("fresh").unwrap());
        assert!(!derived[0].data().contains_key("key1"));
    }

    #[test]
    fn test_dispatch_invalid_action_is_skipped() {
        let rule = always_true_rule(json!([{
            "id": "c1", "type": "dispatch",
            "detail": {"type": "signal", "source": "requestcontent", "eventdataaction": "clone"}
        }]));
        let engine = engine_with(vec![rule]);
        let states = SharedStateStore::new();

        let mut data = EventData::new();
        data.put_string("key1", "v");
        let mut event = trigger_event(data);

        assert!(engine.evaluate(&mut event, &states).is_empty());
    }

    #[test]
    fn test_dispatch_chain_depth_cap() {
        let rule = always_true_rule(json!([{
            "id": "c1", "type": "dispatch",
            "detail": {"type": "analytics", "source": "responsecontent", "eventdataaction": "copy"}
        }]));
        let engine = engine_with(vec![rule]);
        let states = SharedStateStore::new();

        let mut data = EventData::new();
        data.put_string("key1", "v");
        let mut event = trigger_event(data);

        // First generation dispatches.
        let mut derived = engine.evaluate(&mut event, &states);
        assert_eq!(derived.len(), 1);

        // The dispatched event sits at the cap: no further generation.
        let mut chained = derived.remove(0);
        assert!(engine.evaluate(&mut chained, &states).is_empty());
    }

    #[test]
    fn test_chain_entry_evicted_once_evaluated_at_cap() {
        let rule = always_true_rule(json!([{
            "id": "c1", "type": "dispatch",
            "detail": {"type": "analytics", "source": "responsecontent", "eventdataaction": "copy"}
        }]));
        let engine = engine_with(vec![rule]);
        let states = SharedStateStore::new();

        let mut data = EventData::new();
        data.put_string("key1", "v");
        let mut event = trigger_event(data);

        let mut derived = engine.evaluate(&mut event, &states);
        let mut chained = derived.remove(0);
        assert_eq!(engine.chain_depth(chained.id()), Some(1));

        // Evaluating the chained event at the cap finishes its lineage:
        // no further dispatch, and no tracking entry left behind.
        assert!(engine.evaluate(&mut chained, &states).is_empty());
        assert_eq!(engine.chain_depth(chained.id()), None);
    }

    #[test]
    fn test_chain_entry_removed_when_rule_set_has_no_dispatch() {
        let dispatch_rule = always_true_rule(json!([{
            "id": "c1", "type": "dispatch",
            "detail": {"type": "analytics", "source": "responsecontent", "eventdataaction": "copy"}
        }]));
        let engine = engine_with(vec![dispatch_rule]);
        let states = SharedStateStore::new();

        let mut data = EventData::new();
        data.put_string("key1", "v");
        let mut event = trigger_event(data);

        let mut derived = engine.evaluate(&mut event, &states);
        let mut chained = derived.remove(0);
        assert_eq!(engine.chain_depth(chained.id()), Some(1));

        // Reload with a rule set lacking any dispatch consequence:
        // replaying the chained event clears its chain entry entirely.
        let attach_rule = always_true_rule(json!([{
            "id": "c2", "type": "add", "detail": {"eventdata": {"x": 1}}
        }]));
        engine.replace_rules("test_module", vec![attach_rule]);
        engine.evaluate(&mut chained, &states);
        assert_eq!(engine.chain_depth(chained.id()), None);
    }

    #[test]
    fn test_rule_without_consequences_is_dead() {
        assert!(Rule::from_json(&json!({
            "condition": {"type": "matcher", "definition": {"key": "k", "matcher": "ex", "values": []}},
            "consequences": []
        }))
        .is_none());
    }

    #[test]
    fn test_malformed_consequence_does_not_block_siblings() {
        // First consequence is missing its type entirely; second is fine.
        let rule = always_true_rule(json!([
            {"id": "broken"},
            {"id": "ok", "type": "add", "detail": {"eventdata": {"added": 1}}}
        ]));
        let engine = engine_with(vec![rule]);
        let states = SharedStateStore::new();

        let mut data = EventData::new();
        data.put_string("key1", "v");
        let mut event = trigger_event(data);

        engine.evaluate(&mut event, &states);
        assert_eq!(event.data().get_int("added").unwrap(), 1);
    }

    #[test]
    fn test_consequence_detail_token_expansion() {
        let rule = always_true_rule(json!([{
            "id": "c1", "type": "add",
            "detail": {"eventdata": {"echo": "got {%key1%}"}}
        }]));
        let engine = engine_with(vec![rule]);
        let states = SharedStateStore::new();

        let mut data = EventData::new();
        data.put_string("key1", "payload");
        let mut event = trigger_event(data);

        engine.evaluate(&mut event, &states);
        assert_eq!(event.data().get_string("echo").unwrap(), "got payload");
    }

    #[test]
    fn test_non_matching_rule_leaves_event_untouched() {
        let rule = Rule::from_json(&json!({
            "condition": {
                "type": "matcher",
                "definition": {"key": "key1", "matcher": "eq", "values": ["other"]}
            },
            "consequences": [{"id": "c1", "type": "add", "detail": {"eventdata": {"x": 1}}}]
        }))
        .unwrap();
        let engine = engine_with(vec![rule]);
        let states = SharedStateStore::new();

        let mut data = EventData::new();
        data.put_string("key1", "v");
        let mut event = trigger_event(data);

        engine.evaluate(&mut event, &states);
        assert!(!event.data().contains_key("x"));
    }
}
