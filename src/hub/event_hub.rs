//! # EventHub
//!
//! The central broker: global event sequencing, listener registration
//! and dispatch with timeout enforcement, the versioned shared-state
//! store, and the rules engine hook in the delivery path.
//!
//! ## Delivery model
//!
//! Producers may call [`EventHub::dispatch`] from any task or thread;
//! sequence-number assignment and enqueueing happen atomically under
//! one lock, and a single delivery task consumes the queue, so two
//! dispatches never interleave delivery to the same listener. Listener
//! callbacks run in spawned tasks bounded by a wall-clock timeout: a
//! slow listener is logged and abandoned, never allowed to stall the
//! bus.
//!
//! Events dispatched before [`EventHub::finish_registration`] are
//! buffered and replayed right after the hub-booted event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dashmap::DashMap;
use futures::future::BoxFuture;
use std::future::Future;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::config::HubConfig;
use crate::event::{Event, EventSource, EventType};
use crate::event_data::EventData;
use crate::hub::shared_state::{SharedState, SharedStateStore, StateStream};
use crate::module::{ExtensionError, ModuleCallbacks, ModuleInfo, WrapperType};
use crate::rules::engine::{Rule, RulesEngine};
use crate::value::Value;

/// Name the hub publishes its own shared state under.
pub const EVENT_HUB_SHARED_STATE_NAME: &str = "core.eventhub";

/// Name of the state-change events the hub dispatches on writes.
pub const SHARED_STATE_CHANGE: &str = "Shared state change";
pub const SHARED_STATE_CHANGE_XDM: &str = "Shared state change (XDM)";

/// Payload key naming the module whose state changed.
pub const STATE_OWNER_KEY: &str = "stateowner";

#[derive(Debug, Error)]
pub enum HubError {
    #[error("module name must be non-empty")]
    BadModuleName,
    #[error("a module is already registered under the name {0}")]
    DuplicateModuleName(String),
    #[error("module not registered: {0}")]
    UnknownModule(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("event hub is shut down")]
    Shutdown,
}

pub type HubResult<T> = Result<T, HubError>;

/// Async listener callback invoked with a clone of each matching event.
pub type ListenerCallback = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

struct RegisteredListener {
    module: String,
    name: String,
    event_type: EventType,
    source: EventSource,
    callback: ListenerCallback,
}

impl Clone for RegisteredListener {
    fn clone(&self) -> Self {
        Self {
            module: self.module.clone(),
            name: self.name.clone(),
            event_type: self.event_type.clone(),
            source: self.source.clone(),
            callback: self.callback.clone(),
        }
    }
}

struct OneShotListener {
    name: String,
    callback: ListenerCallback,
}

struct RegisteredModule {
    info: ModuleInfo,
    callbacks: Arc<dyn ModuleCallbacks>,
}

struct HubInner {
    config: HubConfig,
    wrapper: RwLock<WrapperType>,
    modules: DashMap<String, RegisteredModule>,
    listeners: Mutex<Vec<RegisteredListener>>,
    oneshot_listeners: DashMap<String, OneShotListener>,
    states: SharedStateStore,
    rules: RulesEngine,
    sequence: Mutex<i64>,
    dispatch_tx: mpsc::UnboundedSender<Event>,
    booted: AtomicBool,
}

impl HubInner {
    /// Assigns the next global sequence number and enqueues in one
    /// critical section, so numbering order is delivery order.
    fn enqueue(&self, mut event: Event) -> HubResult<i64> {
        let mut sequence = self
            .sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *sequence += 1;
        let number = *sequence;
        event.set_event_number(number);
        self.dispatch_tx
            .send(event)
            .map_err(|_| HubError::Shutdown)?;
        Ok(number)
    }

    fn current_sequence(&self) -> i64 {
        *self
            .sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch_state_change(&self, module: &str, stream: StateStream) {
        let name = match stream {
            StateStream::Standard => SHARED_STATE_CHANGE,
            StateStream::Xdm => SHARED_STATE_CHANGE_XDM,
        };
        let mut data = EventData::new();
        data.put_string(STATE_OWNER_KEY, module);
        let event = Event::builder(name, EventType::Hub, EventSource::SharedState)
            .data(data)
            .build();
        if self.enqueue(event).is_err() {
            debug!(module, "state change event dropped, hub shut down");
        }
    }

    /// Publishes the hub's own shared state: SDK version, registered
    /// extensions and the wrapper descriptor.
    fn publish_hub_shared_state(&self) {
        let wrapper = *self
            .wrapper
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut extensions = std::collections::HashMap::new();
        for entry in self.modules.iter() {
            let info = &entry.value().info;
            let mut details = std::collections::HashMap::new();
            details.insert("version".to_string(), Value::from(info.version.clone()));
            details.insert(
                "friendlyName".to_string(),
                Value::from(info.friendly_name.clone()),
            );
            extensions.insert(info.name.clone(), Value::Map(details));
        }

        let mut wrapper_details = std::collections::HashMap::new();
        wrapper_details.insert("type".to_string(), Value::from(wrapper.code()));
        wrapper_details.insert(
            "friendlyName".to_string(),
            Value::from(wrapper.friendly_name()),
        );

        let mut data = EventData::new();
        data.put_string("version", wrapper.sdk_version(&self.config.core_version));
        data.put_map("extensions", extensions);
        data.put_map("wrapper", wrapper_details);

        self.states.create_or_update(
            EVENT_HUB_SHARED_STATE_NAME,
            self.current_sequence(),
            SharedState::Set(data),
            StateStream::Standard,
        );
        self.dispatch_state_change(EVENT_HUB_SHARED_STATE_NAME, StateStream::Standard);
    }

    async fn deliver(&self, event: Event) {
        // Pairing first: a response event consumes its one-shot
        // listener before the general registry sees it.
        if let Some(pair_id) = event.pair_id() {
            if let Some((_, listener)) = self.oneshot_listeners.remove(pair_id) {
                self.invoke(&listener.name, "oneshot", (listener.callback)(event.clone()))
                    .await;
            }
        }

        let targets: Vec<RegisteredListener> = {
            let listeners = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            listeners
                .iter()
                .filter(|l| event.matches(&l.event_type, &l.source))
                .cloned()
                .collect()
        };

        for listener in targets {
            self.invoke(
                &listener.name,
                &listener.module,
                (listener.callback)(event.clone()),
            )
            .await;
        }
    }

    /// Runs one listener invocation bounded by the configured timeout.
    /// The spawned task is abandoned on timeout; side effects it
    /// already applied remain applied.
    async fn invoke(&self, listener: &str, module: &str, fut: BoxFuture<'static, ()>) {
        let limit = self.config.listener_timeout;
        let handle = tokio::spawn(fut);
        match tokio::time::timeout(limit, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(join_error)) => {
                error!(
                    module,
                    listener, "listener {} of module {} failed: {}", listener, module, join_error
                );
            }
            Err(_) => {
                error!(
                    module,
                    listener,
                    "listener {} of module {} exceeded {} milliseconds, moving on",
                    listener,
                    module,
                    limit.as_millis()
                );
            }
        }
    }
}

/// The event hub. Create with [`EventHub::new`] inside a tokio
/// runtime; the delivery task lives until [`EventHub::shutdown`] or
/// until every hub handle is dropped.
pub struct EventHub {
    inner: Arc<HubInner>,
    shutdown_tx: broadcast::Sender<()>,
}

impl EventHub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let inner = Arc::new(HubInner {
            rules: RulesEngine::new(config.max_chained_events),
            config,
            wrapper: RwLock::new(WrapperType::None),
            modules: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
            oneshot_listeners: DashMap::new(),
            states: SharedStateStore::new(),
            sequence: Mutex::new(0),
            dispatch_tx,
            booted: AtomicBool::new(false),
        });
        tokio::spawn(Self::deliver_loop(inner.clone(), dispatch_rx, shutdown_rx));
        Arc::new(Self { inner, shutdown_tx })
    }

    async fn deliver_loop(
        inner: Arc<HubInner>,
        mut dispatch_rx: mpsc::UnboundedReceiver<Event>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut pre_boot: Vec<Event> = Vec::new();
        loop {
            tokio::select! {
                maybe_event = dispatch_rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    if !inner.booted.load(Ordering::SeqCst) {
                        pre_boot.push(event);
                        continue;
                    }
                    Self::process(&inner, event).await;
                    for buffered in pre_boot.drain(..) {
                        Self::process(&inner, buffered).await;
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        debug!("event hub delivery loop stopped");
    }

    async fn process(inner: &Arc<HubInner>, mut event: Event) {
        let derived = inner.rules.evaluate(&mut event, &inner.states);
        for consequence_event in derived {
            if inner.enqueue(consequence_event).is_err() {
                debug!("dispatch consequence dropped, hub shut down");
            }
        }
        inner.deliver(event).await;
    }

    /// Assigns the next global sequence number and queues the event
    /// for delivery. Returns once queued; listeners run later on the
    /// delivery task.
    pub fn dispatch(&self, event: Event) -> HubResult<i64> {
        self.inner.enqueue(event)
    }

    /// Registers a module under its unique name. Duplicate or empty
    /// names are refused: the error is returned, logged, and reported
    /// through the module's own error hook; an existing registration
    /// is never replaced.
    pub fn register_module(
        &self,
        info: ModuleInfo,
        callbacks: Arc<dyn ModuleCallbacks>,
    ) -> HubResult<()> {
        if info.name.is_empty() {
            error!("refusing module registration with empty name");
            callbacks.on_error(ExtensionError::BadName);
            return Err(HubError::BadModuleName);
        }
        match self.inner.modules.entry(info.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                error!(module = %info.name, "refusing duplicate module registration");
                callbacks.on_error(ExtensionError::DuplicateName(info.name.clone()));
                Err(HubError::DuplicateModuleName(info.name))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!(module = %info.name, version = %info.version, "module registered");
                slot.insert(RegisteredModule { info, callbacks });
                if self.inner.booted.load(Ordering::SeqCst) {
                    self.inner.publish_hub_shared_state();
                }
                Ok(())
            }
        }
    }

    /// Removes a module, its listeners and its entry in the hub's
    /// module list, then fires its `on_unregistered` hook exactly
    /// once. Unknown names are an expected no-op.
    pub fn unregister_module(&self, name: &str) {
        let Some((_, module)) = self.inner.modules.remove(name) else {
            debug!(module = name, "no module registered to unregister");
            return;
        };
        {
            let mut listeners = self
                .inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            listeners.retain(|l| l.module != name);
        }
        self.inner.rules.unregister_rules(name);
        if self.inner.booted.load(Ordering::SeqCst) {
            self.inner.publish_hub_shared_state();
        }
        module.callbacks.on_unregistered();
        info!(module = name, "module unregistered");
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.modules.contains_key(name)
    }

    pub fn module_count(&self) -> usize {
        self.inner.modules.len()
    }

    /// Registers a listener for the exact (type, source) pair, or for
    /// everything via the wildcard tags. Delivery order across the
    /// listeners of one event is registration order.
    pub fn register_listener<F, Fut>(
        &self,
        module: &str,
        event_type: EventType,
        source: EventSource,
        name: &str,
        callback: F,
    ) -> HubResult<()>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !self.inner.modules.contains_key(module) {
            return Err(HubError::UnknownModule(module.to_string()));
        }
        let callback: ListenerCallback = Arc::new(move |event| Box::pin(callback(event)));
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.push(RegisteredListener {
            module: module.to_string(),
            name: name.to_string(),
            event_type,
            source,
            callback,
        });
        Ok(())
    }

    /// Registers a listener that fires at most once, for the event
    /// whose `pair_id` equals `pair_id` (request/response pairing).
    pub fn register_oneshot_listener<F, Fut>(&self, pair_id: &str, name: &str, callback: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: ListenerCallback = Arc::new(move |event| Box::pin(callback(event)));
        self.inner.oneshot_listeners.insert(
            pair_id.to_string(),
            OneShotListener {
                name: name.to_string(),
                callback,
            },
        );
    }

    /// Finishes boot. Idempotent: the hub-booted event fires exactly
    /// once and the hub's shared state is published once, but the
    /// completion callback runs on every call.
    pub fn finish_registration(&self, callback: impl FnOnce()) {
        if !self.inner.booted.swap(true, Ordering::SeqCst) {
            // The booted event must be the first post-boot delivery:
            // the delivery task drains buffered pre-boot events right
            // after the first event it processes, so the hub's own
            // shared state is published after the booted event.
            let booted = Event::builder("EventHub booted", EventType::Hub, EventSource::Booted).build();
            if self.dispatch(booted).is_err() {
                debug!("booted event dropped, hub shut down");
            }
            self.inner.publish_hub_shared_state();
            info!("event hub booted");
        }
        callback();
    }

    pub fn is_booted(&self) -> bool {
        self.inner.booted.load(Ordering::SeqCst)
    }

    /// Identifies the cross-platform host layer; reflected in the
    /// version string of the next published hub shared state.
    pub fn set_wrapper_type(&self, wrapper: WrapperType) {
        *self
            .inner
            .wrapper
            .write()
            .unwrap_or_else(PoisonError::into_inner) = wrapper;
        if self.inner.booted.load(Ordering::SeqCst) {
            self.inner.publish_hub_shared_state();
        }
    }

    /// Publishes `data` as `module`'s state at `version`; the first
    /// write for a version wins. Dispatches a state-change event
    /// naming the owner.
    pub fn create_shared_state(
        &self,
        module: &str,
        version: i64,
        state: SharedState,
        stream: StateStream,
    ) -> HubResult<()> {
        if module.is_empty() {
            return Err(HubError::BadModuleName);
        }
        if !self.inner.states.create(module, version, state, stream) {
            debug!(module, version, "shared state version already exists, keeping first write");
        }
        self.inner.dispatch_state_change(module, stream);
        Ok(())
    }

    /// Like [`Self::create_shared_state`] but the last write for a
    /// version wins.
    pub fn create_or_update_shared_state(
        &self,
        module: &str,
        version: i64,
        state: SharedState,
        stream: StateStream,
    ) -> HubResult<()> {
        if module.is_empty() {
            return Err(HubError::BadModuleName);
        }
        self.inner
            .states
            .create_or_update(module, version, state, stream);
        self.inner.dispatch_state_change(module, stream);
        Ok(())
    }

    /// Resolves `module`'s state as of `event`'s version (latest when
    /// `event` is `None`). Returns the pending sentinel when the
    /// resolved version is explicitly pending and `None` when nothing
    /// has been published at or below the requested version.
    ///
    /// The read is non-blocking; a requester repeatedly starved on a
    /// module that is itself starved on the requester is detected via
    /// the wait graph and logged, never deadlocked.
    pub fn get_shared_event_state(
        &self,
        module: &str,
        event: Option<&Event>,
        requesting_module: &str,
        stream: StateStream,
    ) -> HubResult<Option<SharedState>> {
        if module.is_empty() {
            return Err(HubError::InvalidArgument(
                "shared state module name must be non-empty".to_string(),
            ));
        }
        let version = event.map(|e| e.event_number());
        let resolved = self.inner.states.resolve(module, version, stream);
        match &resolved {
            Some(SharedState::Set(_)) | Some(SharedState::Invalid) => {
                self.inner.states.note_resolved(requesting_module);
            }
            _ => {
                self.inner.states.note_unresolved(requesting_module, module);
            }
        }
        Ok(resolved)
    }

    /// Purges every version `module` has published on `stream`.
    pub fn clear_shared_states(&self, module: &str, stream: StateStream) -> HubResult<()> {
        if module.is_empty() {
            return Err(HubError::BadModuleName);
        }
        self.inner.states.clear(module, stream);
        Ok(())
    }

    /// Replaces `module`'s rule queue wholesale (configuration
    /// reload).
    pub fn replace_rules(&self, module: &str, rules: Vec<Rule>) {
        self.inner.rules.replace_rules(module, rules);
    }

    pub fn unregister_rules(&self, module: &str) {
        self.inner.rules.unregister_rules(module);
    }

    /// Stops the delivery task. Queued events are dropped; dispatch
    /// after shutdown fails with [`HubError::Shutdown`] once the
    /// channel closes.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::no_callbacks;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{sleep, Duration};

    fn module(name: &str) -> ModuleInfo {
        ModuleInfo::new(name, name.to_uppercase(), "1.0.0")
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let hub = EventHub::new(HubConfig::default());
        hub.register_module(module("analytics"), no_callbacks())
            .unwrap();
        let result = hub.register_module(module("analytics"), no_callbacks());
        assert!(matches!(result, Err(HubError::DuplicateModuleName(_))));
        assert_eq!(hub.module_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let hub = EventHub::new(HubConfig::default());
        let result = hub.register_module(module(""), no_callbacks());
        assert!(matches!(result, Err(HubError::BadModuleName)));
        assert_eq!(hub.module_count(), 0);
    }

    #[tokio::test]
    async fn test_extension_error_hook_fires_on_duplicate() {
        struct Recorder(Mutex<Vec<ExtensionError>>);
        impl ModuleCallbacks for Recorder {
            fn on_error(&self, error: ExtensionError) {
                self.0.lock().unwrap().push(error);
            }
        }

        let hub = EventHub::new(HubConfig::default());
        hub.register_module(module("m"), no_callbacks()).unwrap();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let _ = hub.register_module(module("m"), recorder.clone());
        assert_eq!(
            recorder.0.lock().unwrap().as_slice(),
            &[ExtensionError::DuplicateName("m".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unregister_fires_hook_once_and_drops_listeners() {
        struct Hook(AtomicUsize);
        impl ModuleCallbacks for Hook {
            fn on_unregistered(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let hub = EventHub::new(HubConfig::default());
        let hook = Arc::new(Hook(AtomicUsize::new(0)));
        hub.register_module(module("m"), hook.clone()).unwrap();
        hub.register_listener("m", EventType::Wildcard, EventSource::Wildcard, "l", |_| async {})
            .unwrap();

        hub.unregister_module("m");
        hub.unregister_module("m"); // expected no-op
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
        assert!(!hub.is_registered("m"));
    }

    #[tokio::test]
    async fn test_listener_requires_registered_module() {
        let hub = EventHub::new(HubConfig::default());
        let result =
            hub.register_listener("ghost", EventType::Wildcard, EventSource::Wildcard, "l", |_| async {});
        assert!(matches!(result, Err(HubError::UnknownModule(_))));
    }

    #[tokio::test]
    async fn test_finish_registration_is_idempotent() {
        let hub = EventHub::new(HubConfig::default());
        hub.register_module(module("m"), no_callbacks()).unwrap();

        let booted_seen = Arc::new(AtomicUsize::new(0));
        let seen = booted_seen.clone();
        hub.register_listener("m", EventType::Hub, EventSource::Booted, "boot", move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        let callbacks = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = callbacks.clone();
            hub.finish_registration(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        sleep(Duration::from_millis(100)).await;

        assert_eq!(callbacks.load(Ordering::SeqCst), 3);
        assert_eq!(booted_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hub_shared_state_wire_shape() {
        let hub = EventHub::new(HubConfig::default());
        hub.register_module(module("analytics"), no_callbacks())
            .unwrap();
        hub.set_wrapper_type(WrapperType::Flutter);
        hub.finish_registration(|| {});
        sleep(Duration::from_millis(50)).await;

        let state = hub
            .get_shared_event_state(EVENT_HUB_SHARED_STATE_NAME, None, "test", StateStream::Standard)
            .unwrap()
            .unwrap();
        let data = state.data().unwrap();
        assert!(data.get_string("version").unwrap().ends_with("-F"));

        let extensions = data.get_map("extensions").unwrap();
        let analytics = extensions["analytics"].as_map().unwrap();
        assert_eq!(analytics["friendlyName"], Value::from("ANALYTICS"));
        assert_eq!(analytics["version"], Value::from("1.0.0"));

        let wrapper = data.get_map("wrapper").unwrap();
        assert_eq!(wrapper["type"], Value::from("F"));
        assert_eq!(wrapper["friendlyName"], Value::from("Flutter"));
    }

    #[tokio::test]
    async fn test_invalid_shared_state_arguments() {
        let hub = EventHub::new(HubConfig::default());
        assert!(hub
            .create_shared_state("", 0, SharedState::Pending, StateStream::Standard)
            .is_err());
        assert!(hub
            .get_shared_event_state("", None, "m", StateStream::Standard)
            .is_err());
        assert!(hub.clear_shared_states("", StateStream::Standard).is_err());
    }

    #[tokio::test]
    async fn test_oneshot_listener_fires_once() {
        let hub = EventHub::new(HubConfig::default());
        hub.finish_registration(|| {});

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        hub.register_oneshot_listener("pair-1", "oneshot", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        for _ in 0..2 {
            let response = Event::builder("response", EventType::Analytics, EventSource::ResponseContent)
                .pair_id("pair-1")
                .build();
            hub.dispatch(response).unwrap();
        }
        sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
