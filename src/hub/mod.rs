//! Event hub and versioned shared state.
//!
//! [`event_hub::EventHub`] is the broker every module talks to:
//! registration, listener dispatch, rules evaluation and the shared
//! state store all hang off it. [`shared_state::SharedStateStore`]
//! holds the append-only version history each module publishes.

pub mod event_hub;
pub mod shared_state;

pub use event_hub::{EventHub, HubError, HubResult, EVENT_HUB_SHARED_STATE_NAME};
pub use shared_state::{SharedState, SharedStateStore, StateStream};
