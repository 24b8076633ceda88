//! # Event
//!
//! The immutable record flowing through the hub. Events are built via
//! [`EventBuilder`], after which only two things ever change: the hub
//! assigns the global `event_number` exactly once at dispatch, and rule
//! consequences are permitted to merge into the payload in place.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::event_data::EventData;

/// Category tag routing an event to interested listeners.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, strum::Display, strum::EnumString, Default,
)]
#[strum(serialize_all = "lowercase")]
pub enum EventType {
    Acquisition,
    Analytics,
    Configuration,
    #[default]
    Hub,
    Identity,
    Lifecycle,
    RulesEngine,
    Signal,
    System,
    Target,
    UserProfile,
    #[strum(to_string = "{0}", default)]
    Custom(String),
    Wildcard,
}

/// Origin tag paired with [`EventType`] for listener matching.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, strum::Display, strum::EnumString, Default,
)]
#[strum(serialize_all = "lowercase")]
pub enum EventSource {
    #[default]
    None,
    Os,
    RequestContent,
    RequestIdentity,
    RequestProfile,
    ResponseContent,
    ResponseIdentity,
    ResponseProfile,
    SharedState,
    Booted,
    #[strum(to_string = "{0}", default)]
    Custom(String),
    Wildcard,
}

/// An immutable event record.
///
/// `event_number` stays `0` until the event passes through
/// [`crate::hub::EventHub::dispatch`]; after that it is unique and
/// strictly increasing across the whole hub lifetime, internal events
/// included. `response_pair_id` is generated at construction so a
/// listener can always be matched to a single subsequent response
/// event; `pair_id` is only set when this event answers a prior one.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: Uuid,
    event_type: EventType,
    source: EventSource,
    name: String,
    data: EventData,
    event_number: i64,
    timestamp: DateTime<Utc>,
    pair_id: Option<String>,
    response_pair_id: String,
}

impl Event {
    pub fn builder(name: impl Into<String>, event_type: EventType, source: EventSource) -> EventBuilder {
        EventBuilder::new(name, event_type, source)
    }

    /// Stable identity of this event, preserved across clones. Chain
    /// tracking in the rules engine is keyed on it.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn source(&self) -> &EventSource {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    /// Mutable payload access for consequence processing (attach-data /
    /// modify-data merges).
    pub fn data_mut(&mut self) -> &mut EventData {
        &mut self.data
    }

    pub fn event_number(&self) -> i64 {
        self.event_number
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn pair_id(&self) -> Option<&str> {
        self.pair_id.as_deref()
    }

    pub fn response_pair_id(&self) -> &str {
        &self.response_pair_id
    }

    /// Assigned exactly once by the hub at dispatch time.
    pub(crate) fn set_event_number(&mut self, number: i64) {
        self.event_number = number;
    }

    /// Matches a registered listener's (type, source) selector, with
    /// wildcard on either side matching everything.
    pub fn matches(&self, event_type: &EventType, source: &EventSource) -> bool {
        let type_ok = *event_type == EventType::Wildcard || *event_type == self.event_type;
        let source_ok = *source == EventSource::Wildcard || *source == self.source;
        type_ok && source_ok
    }
}

/// Builds an [`Event`]; everything not supplied falls back to an empty
/// payload and no pairing id.
pub struct EventBuilder {
    event_type: EventType,
    source: EventSource,
    name: String,
    data: EventData,
    pair_id: Option<String>,
}

impl EventBuilder {
    pub fn new(name: impl Into<String>, event_type: EventType, source: EventSource) -> Self {
        Self {
            event_type,
            source,
            name: name.into(),
            data: EventData::new(),
            pair_id: None,
        }
    }

    /// Payload is copied into the event; the builder's caller keeps no
    /// handle into the built event's data.
    pub fn data(mut self, data: EventData) -> Self {
        self.data = data;
        self
    }

    pub fn pair_id(mut self, pair_id: impl Into<String>) -> Self {
        self.pair_id = Some(pair_id.into());
        self
    }

    pub fn build(self) -> Event {
        Event {
            id: Uuid::new_v4(),
            event_type: self.event_type,
            source: self.source,
            name: self.name,
            data: self.data,
            event_number: 0,
            timestamp: Utc::now(),
            pair_id: self.pair_id,
            response_pair_id: Uuid::new_v4().to_string(),
        }
    }
}
