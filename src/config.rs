//! Hub configuration and the layered configuration merge.
//!
//! [`HubConfig`] tunes the hub itself and deserializes from host-app
//! supplied JSON with sensible defaults. [`LayeredConfig`] is the
//! in-core half of the configuration subsystem: it merges the bundled,
//! remote and programmatic-override layers into one effective payload.
//! Downloading and caching remote configuration stays behind the
//! [`ConfigProvider`] seam.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::event_data::EventData;
use crate::value::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Hard wall-clock deadline per listener invocation. A listener
    /// exceeding it is logged and abandoned; the delivery loop moves on.
    #[serde(default = "default_listener_timeout", with = "duration_ms")]
    pub listener_timeout: Duration,

    /// Maximum generations of dispatch consequences a single event may
    /// spawn before further dispatch consequences are refused.
    #[serde(default = "default_max_chained_events")]
    pub max_chained_events: u32,

    /// Version of the SDK core embedding this hub, reported in the
    /// hub's own shared state.
    #[serde(default = "default_core_version")]
    pub core_version: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listener_timeout: default_listener_timeout(),
            max_chained_events: default_max_chained_events(),
            core_version: default_core_version(),
        }
    }
}

fn default_listener_timeout() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_chained_events() -> u32 {
    1
}

fn default_core_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Collaborator seam for the configuration download/cache manager:
/// hands the core the current effective remote configuration. Change
/// notification flows through the hub's shared-state mechanism.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn current(&self) -> EventData;
}

/// Three configuration layers merged with later-layer-wins semantics:
/// bundled defaults, then the remote/cached configuration, then
/// programmatic overrides from the host app.
#[derive(Debug, Clone, Default)]
pub struct LayeredConfig {
    bundled: EventData,
    remote: EventData,
    overrides: EventData,
}

impl LayeredConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bundled(&mut self, data: EventData) {
        self.bundled = data;
    }

    pub fn set_remote(&mut self, data: EventData) {
        self.remote = data;
    }

    pub fn set_overrides(&mut self, data: EventData) {
        self.overrides = data;
    }

    /// Shallow key merge across the three layers. A `Value::Null` in a
    /// later layer removes the key instead of overriding it, so a host
    /// app can cancel a bundled default.
    pub fn effective(&self) -> EventData {
        let mut merged = EventData::new();
        for layer in [&self.bundled, &self.remote, &self.overrides] {
            for (key, value) in layer.as_map() {
                match value {
                    Value::Null => {
                        merged.remove(key);
                    }
                    other => {
                        merged.put(key.clone(), other.clone());
                    }
                }
            }
        }
        merged
    }
}

pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
