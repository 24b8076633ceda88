use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use beacon_core::config::HubConfig;
use beacon_core::event::{Event, EventSource, EventType};
use beacon_core::hub::{EventHub, SharedState, StateStream};
use beacon_core::module::{no_callbacks, ModuleInfo};
use beacon_core::rules::Rule;
use beacon_core::EventData;
use serde_json::json;
use tokio::time::{sleep, Duration};

async fn booted_hub() -> Arc<EventHub> {
    let hub = EventHub::new(HubConfig::default());
    hub.register_module(
        ModuleInfo::new("rules", "Rules", "1.0.0"),
        no_callbacks(),
    )
    .unwrap();
    hub.finish_registration(|| {});
    sleep(Duration::from_millis(20)).await;
    hub
}

fn rule(definition: serde_json::Value) -> Rule {
    Rule::from_json(&definition).unwrap()
}

fn track_event(action: &str) -> Event {
    let mut data = EventData::new();
    data.put_string("action", action);
    Event::builder("track", EventType::Analytics, EventSource::RequestContent)
        .data(data)
        .build()
}

#[tokio::test]
async fn test_attach_consequence_rewrites_event_before_delivery() {
    let hub = booted_hub().await;
    hub.replace_rules(
        "rules",
        vec![rule(json!({
            "condition": {
                "type": "matcher",
                "definition": {"key": "action", "matcher": "eq", "values": ["purchase"]}
            },
            "consequences": [{
                "id": "c1", "type": "add",
                "detail": {"eventdata": {"campaign": "summer"}}
            }]
        }))],
    );

    let payloads = Arc::new(Mutex::new(Vec::new()));
    let sink = payloads.clone();
    hub.register_listener(
        "rules",
        EventType::Analytics,
        EventSource::RequestContent,
        "observer",
        move |event| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(event.data().clone());
            }
        },
    )
    .unwrap();

    hub.dispatch(track_event("purchase")).unwrap();
    hub.dispatch(track_event("browse")).unwrap();
    sleep(Duration::from_millis(100)).await;

    let observed = payloads.lock().unwrap().clone();
    assert_eq!(observed.len(), 2);
    assert_eq!(observed[0].get_string("campaign").unwrap(), "summer");
    assert_eq!(observed[0].get_string("action").unwrap(), "purchase");
    assert!(!observed[1].contains_key("campaign"));
}

#[tokio::test]
async fn test_modify_consequence_removes_payload_key() {
    let hub = booted_hub().await;
    hub.replace_rules(
        "rules",
        vec![rule(json!({
            "condition": {
                "type": "matcher",
                "definition": {"key": "action", "matcher": "ex", "values": []}
            },
            "consequences": [{
                "id": "c1", "type": "mod",
                "detail": {"eventdata": {"action": null, "scrubbed": true}}
            }]
        }))],
    );

    let payloads = Arc::new(Mutex::new(Vec::new()));
    let sink = payloads.clone();
    hub.register_listener(
        "rules",
        EventType::Analytics,
        EventSource::RequestContent,
        "observer",
        move |event| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(event.data().clone());
            }
        },
    )
    .unwrap();

    hub.dispatch(track_event("secret")).unwrap();
    sleep(Duration::from_millis(100)).await;

    let observed = payloads.lock().unwrap().clone();
    assert!(!observed[0].contains_key("action"));
    assert!(observed[0].get_bool("scrubbed").unwrap());
}

#[tokio::test]
async fn test_dispatch_consequence_chains_exactly_once() {
    let hub = booted_hub().await;
    // The dispatched copy matches the same rule again, so without the
    // chain cap this would loop forever.
    hub.replace_rules(
        "rules",
        vec![rule(json!({
            "condition": {
                "type": "matcher",
                "definition": {"key": "action", "matcher": "ex", "values": []}
            },
            "consequences": [{
                "id": "c1", "type": "dispatch",
                "detail": {
                    "type": "analytics",
                    "source": "requestcontent",
                    "eventdataaction": "copy"
                }
            }]
        }))],
    );

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    hub.register_listener(
        "rules",
        EventType::Analytics,
        EventSource::RequestContent,
        "observer",
        move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        },
    )
    .unwrap();

    hub.dispatch(track_event("loop")).unwrap();
    sleep(Duration::from_millis(300)).await;

    // Trigger plus one chained generation, nothing further.
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_consequence_detail_expands_shared_state_tokens() {
    let hub = booted_hub().await;

    let mut lifecycle = EventData::new();
    lifecycle.put_string("appversion", "3.1.4");
    hub.create_shared_state("lifecycle", 0, SharedState::Set(lifecycle), StateStream::Standard)
        .unwrap();

    hub.replace_rules(
        "rules",
        vec![rule(json!({
            "condition": {
                "type": "matcher",
                "definition": {"key": "action", "matcher": "ex", "values": []}
            },
            "consequences": [{
                "id": "c1", "type": "add",
                "detail": {"eventdata": {
                    "stamp": "{%~state.lifecycle/appversion%} via {%~type%}"
                }}
            }]
        }))],
    );

    let payloads = Arc::new(Mutex::new(Vec::new()));
    let sink = payloads.clone();
    hub.register_listener(
        "rules",
        EventType::Analytics,
        EventSource::RequestContent,
        "observer",
        move |event| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(event.data().clone());
            }
        },
    )
    .unwrap();

    hub.dispatch(track_event("any")).unwrap();
    sleep(Duration::from_millis(100)).await;

    let observed = payloads.lock().unwrap().clone();
    assert_eq!(observed[0].get_string("stamp").unwrap(), "3.1.4 via analytics");
}

#[tokio::test]
async fn test_unregister_rules_stops_matching() {
    let hub = booted_hub().await;
    hub.replace_rules(
        "rules",
        vec![rule(json!({
            "condition": {
                "type": "matcher",
                "definition": {"key": "action", "matcher": "ex", "values": []}
            },
            "consequences": [{
                "id": "c1", "type": "add",
                "detail": {"eventdata": {"tagged": true}}
            }]
        }))],
    );
    hub.unregister_rules("rules");

    let payloads = Arc::new(Mutex::new(Vec::new()));
    let sink = payloads.clone();
    hub.register_listener(
        "rules",
        EventType::Analytics,
        EventSource::RequestContent,
        "observer",
        move |event| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(event.data().clone());
            }
        },
    )
    .unwrap();

    hub.dispatch(track_event("x")).unwrap();
    sleep(Duration::from_millis(100)).await;

    assert!(!payloads.lock().unwrap()[0].contains_key("tagged"));
}
