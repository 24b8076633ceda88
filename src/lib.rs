//! # Beacon Core: Mobile Analytics SDK Event Bus
//!
//! Beacon Core is the in-process backbone a mobile analytics SDK is
//! assembled on: an event hub with globally sequenced delivery, a
//! versioned shared-state store for cross-module reads, and a rules
//! engine that rewrites and synthesizes events in flight.
//!
//! ## Architecture
//!
//! ### 1. Events and Payloads
//! Every interaction is an [`event::Event`]: a (type, source) routing
//! pair plus an [`event_data::EventData`] payload of typed
//! [`value::Value`] entries. Payloads support canonical FNV-1a
//! fingerprinting for privacy-preserving identifiers.
//!
//! ### 2. The Hub
//! The [`hub::EventHub`] brokers everything: module registration with
//! duplicate protection, listener dispatch in registration order with
//! per-listener timeouts, and the append-only shared-state history
//! ([`hub::SharedStateStore`]) that lets modules observe each other's
//! state as of a specific event version.
//!
//! ### 3. Rules
//! The [`rules`] engine evaluates condition trees against each event
//! and executes consequences: attaching data, modifying data, or
//! dispatching new events with chain-depth loop protection. String
//! operands expand `{%token%}` placeholders against the triggering
//! event and shared state.
//!
//! ### 4. Configuration
//! [`config`] carries the hub's own knobs plus the layered
//! bundled/remote/override configuration seam modules read their
//! settings through.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use beacon_core::config::HubConfig;
//! use beacon_core::event::{Event, EventSource, EventType};
//! use beacon_core::hub::EventHub;
//! use beacon_core::module::{no_callbacks, ModuleInfo};
//!
//! # async fn run() {
//! let hub = EventHub::new(HubConfig::default());
//! hub.register_module(ModuleInfo::new("analytics", "Analytics", "1.0.0"), no_callbacks())
//!     .unwrap();
//! hub.register_listener(
//!     "analytics",
//!     EventType::Analytics,
//!     EventSource::RequestContent,
//!     "track",
//!     |event: Event| async move {
//!         println!("tracked: {}", event.name());
//!     },
//! )
//! .unwrap();
//! hub.finish_registration(|| {});
//!
//! let event = Event::builder("track", EventType::Analytics, EventSource::RequestContent).build();
//! hub.dispatch(event).unwrap();
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod event_data;
pub mod hub;
pub mod module;
pub mod rules;
pub mod value;

// Re-exports
pub use error::{Error, Result};
pub use event::{Event, EventBuilder, EventSource, EventType};
pub use event_data::EventData;
pub use hub::{EventHub, SharedState, StateStream};
pub use value::Value;

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}
