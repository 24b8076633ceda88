//! Versioned shared-state store.
//!
//! Each module owns two independently versioned, append-only streams of
//! payload snapshots (standard and XDM). Other modules read a snapshot
//! "as of" a given event version; reads resolve to the greatest
//! published version at or below the requested one. A version can be
//! published as a `Pending` placeholder ("will resolve at a higher
//! version") or `Invalid` ("no data, stop waiting") before its concrete
//! data exists.
//!
//! Reads are non-blocking. A wait graph tracks which module is
//! currently starved on which other module's state so that a mutual
//! wait is reported as a warning instead of turning into a live-lock.

use dashmap::DashMap;
use tracing::warn;

use crate::event_data::EventData;

/// Which of a module's two state streams an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display)]
pub enum StateStream {
    #[default]
    Standard,
    Xdm,
}

/// A published snapshot, or one of the two sentinels.
#[derive(Debug, Clone, PartialEq)]
pub enum SharedState {
    Set(EventData),
    /// Placeholder: concrete data will arrive at a higher version.
    Pending,
    /// No data will ever arrive for this version; stop waiting.
    Invalid,
}

impl SharedState {
    pub fn data(&self) -> Option<&EventData> {
        match self {
            SharedState::Set(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, SharedState::Pending)
    }
}

#[derive(Debug, Clone)]
struct StateEntry {
    version: i64,
    state: SharedState,
}

/// Append-only versioned store keyed by (module name, stream).
///
/// Writers append whole entries under the per-key map lock, so a
/// partially-written version is never visible to readers.
#[derive(Default)]
pub struct SharedStateStore {
    states: DashMap<(String, StateStream), Vec<StateEntry>>,
    /// requester -> module whose state the requester is starved on.
    wait_graph: DashMap<String, String>,
}

impl SharedStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// First write for a version wins: returns false (and stores
    /// nothing) if the version already exists for this module/stream.
    pub fn create(&self, module: &str, version: i64, state: SharedState, stream: StateStream) -> bool {
        let mut entries = self
            .states
            .entry((module.to_string(), stream))
            .or_default();
        match entries.binary_search_by_key(&version, |e| e.version) {
            Ok(_) => false,
            Err(pos) => {
                entries.insert(pos, StateEntry { version, state });
                true
            }
        }
    }

    /// Last write for a version wins: replaces an existing entry or
    /// appends a new one.
    pub fn create_or_update(&self, module: &str, version: i64, state: SharedState, stream: StateStream) {
        let mut entries = self
            .states
            .entry((module.to_string(), stream))
            .or_default();
        match entries.binary_search_by_key(&version, |e| e.version) {
            Ok(pos) => entries[pos].state = state,
            Err(pos) => entries.insert(pos, StateEntry { version, state }),
        }
    }

    /// Resolves the state at the greatest published version at or below
    /// `version` (`None` asks for the latest overall). Absent when
    /// nothing at or below the requested version has been published.
    pub fn resolve(&self, module: &str, version: Option<i64>, stream: StateStream) -> Option<SharedState> {
        let entries = self.states.get(&(module.to_string(), stream))?;
        let candidate = match version {
            Some(v) => entries.iter().rev().find(|e| e.version <= v),
            None => entries.last(),
        };
        candidate.map(|e| e.state.clone())
    }

    /// Purges every published version for the module/stream.
    pub fn clear(&self, module: &str, stream: StateStream) {
        self.states.remove(&(module.to_string(), stream));
    }

    pub fn has_any(&self, module: &str, stream: StateStream) -> bool {
        self.states
            .get(&(module.to_string(), stream))
            .map(|e| !e.is_empty())
            .unwrap_or(false)
    }

    /// Records that `requester`'s read of `target` did not resolve to
    /// concrete data, and checks the wait graph for a cycle back to the
    /// requester. A detected mutual wait is logged as a warning naming
    /// both modules; nothing ever blocks.
    pub fn note_unresolved(&self, requester: &str, target: &str) {
        if requester == target {
            return;
        }
        self.wait_graph
            .insert(requester.to_string(), target.to_string());

        // Walk requester -> target -> ... looking for a path back.
        let mut current = target.to_string();
        let mut hops = 0;
        while let Some(next) = self.wait_graph.get(&current).map(|e| e.value().clone()) {
            if next == requester {
                warn!(
                    requester = %requester,
                    target = %target,
                    "circular shared-state dependency detected between {} and {}",
                    requester, target
                );
                return;
            }
            current = next;
            hops += 1;
            if hops > self.wait_graph.len() {
                return;
            }
        }
    }

    /// A resolved read clears the requester's starvation edge.
    pub fn note_resolved(&self, requester: &str) {
        self.wait_graph.remove(requester);
    }

    #[cfg(test)]
    pub(crate) fn is_waiting(&self, requester: &str) -> bool {
        self.wait_graph.contains_key(requester)
    }
}
