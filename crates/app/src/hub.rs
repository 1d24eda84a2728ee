//! Hub — wires the components together and runs the event loop.
//!
//! Providers push [`HubEvent`]s into one queue, rule timers push rule ids
//! into another. [`Hub::run`] drains both from a single task, handling each
//! event completely (registry, devices, constraints, rules, sync) before the
//! next, so every component observes the same order.

use std::collections::BTreeMap;
use std::sync::Arc;

use hearth_domain::device::Device;
use hearth_domain::error::{HearthError, NotFoundError, ValidationError};
use hearth_domain::event::HubEvent;
use hearth_domain::id::{HandleId, RuleId, UniqueId};
use hearth_domain::script::RuleScript;
use hearth_domain::service::ServiceSnapshot;
use hearth_domain::sync::{SyncCursor, SyncFrame};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, mpsc, watch};

use crate::constraints::Constraints;
use crate::devices::Devices;
use crate::handlers::Handlers;
use crate::ports::SnapshotSource;
use crate::provider::Provider;
use crate::registry::Registry;
use crate::rules::{RuleBody, RuleInfo, Rules, ScriptRule};
use crate::sync::SyncBroadcaster;

/// Tuning knobs of a [`Hub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubOptions {
    /// Frames buffered per sync subscriber before it starts lagging.
    pub sync_capacity: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self { sync_capacity: 256 }
    }
}

struct Queues {
    events: mpsc::UnboundedReceiver<HubEvent>,
    rules: mpsc::UnboundedReceiver<RuleId>,
}

/// The orchestration hub.
pub struct Hub {
    registry: Registry,
    devices: Devices,
    constraints: Constraints,
    handlers: Handlers,
    rules: Rules,
    sync: SyncBroadcaster,
    queues: Mutex<Queues>,
    stop: watch::Sender<bool>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("instance", &self.sync.instance())
            .field("registry", &self.registry)
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl Hub {
    #[must_use]
    pub fn new(options: HubOptions) -> Arc<Self> {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (rule_tx, rules) = mpsc::unbounded_channel();
        let (stop, _) = watch::channel(false);
        Arc::new(Self {
            registry: Registry::new(event_tx),
            devices: Devices::new(),
            constraints: Constraints::new(),
            handlers: Handlers::new(),
            rules: Rules::new(rule_tx),
            sync: SyncBroadcaster::new(options.sync_capacity),
            queues: Mutex::new(Queues { events, rules }),
            stop,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn devices(&self) -> &Devices {
        &self.devices
    }

    #[must_use]
    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    #[must_use]
    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    #[must_use]
    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    #[must_use]
    pub fn sync(&self) -> &SyncBroadcaster {
        &self.sync
    }

    /// Subscribe to sync frames broadcast from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncFrame> {
        self.sync.subscribe()
    }

    /// Flips to `true` once [`shutdown`](Self::shutdown) is called.
    #[must_use]
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// Attach a provider to the registry.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::Validation`] for a duplicate provider id.
    pub fn add_provider(&self, provider: Arc<Provider>) -> Result<(), HearthError> {
        self.registry.add_provider(provider)
    }

    /// Write a property through the handler chain.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] for an unknown service, or the
    /// native write's error when no handler consumed the write.
    pub async fn write(&self, service: &UniqueId, key: &str, value: Value) -> Result<(), HearthError> {
        let target = self.registry.require(service)?;
        self.handlers.dispatch(&target, key, value).await
    }

    /// Write a property on behalf of an external client. The handler chain
    /// runs first; a write no handler consumes must target a declared,
    /// writable property with a value of the declared type.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::Validation`] when an unconsumed write targets
    /// an undeclared or read-only property or has the wrong type, otherwise
    /// the native write's error.
    #[tracing::instrument(skip(self, service, value), fields(service = %service))]
    pub async fn write_property(&self, service: &UniqueId, key: &str, value: Value) -> Result<(), HearthError> {
        let target = self.registry.require(service)?;
        if self.handlers.intercept(&target, key, &value).await {
            return Ok(());
        }
        let schema = target
            .read(|s| s.property(key).cloned())
            .ok_or_else(|| ValidationError::UnknownProperty(key.to_string()))?;
        if schema.read_only {
            return Err(ValidationError::ReadOnlyProperty(key.to_string()).into());
        }
        if !schema.kind.accepts(&value) {
            return Err(ValidationError::InvalidRequest(format!(
                "{value} is not a valid {:?} value for {key:?}",
                schema.kind
            ))
            .into());
        }
        target.set_value(key, value).await
    }

    /// Invoke a declared action.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] when the service or the action is
    /// unknown, or whatever the backend reports.
    #[tracing::instrument(skip(self, service, args), fields(service = %service))]
    pub async fn trigger_action(&self, service: &UniqueId, action: &str, args: Value) -> Result<Value, HearthError> {
        let target = self.registry.require(service)?;
        if !target.read(|s| s.has_action(action)) {
            return Err(NotFoundError {
                entity: "Action",
                id: format!("{service}/{action}"),
            }
            .into());
        }
        target.trigger_action(action, args).await
    }

    /// Add or update `handle`'s constraint and enforce the resulting value.
    ///
    /// # Errors
    ///
    /// Returns the enforcing write's error. The constraint is recorded
    /// either way.
    #[tracing::instrument(skip(self, service, value), fields(service = %service))]
    pub async fn constrain(
        &self,
        service: &UniqueId,
        key: &str,
        handle: HandleId,
        priority: i32,
        value: Value,
    ) -> Result<(), HearthError> {
        match self.constraints.set(service, key, handle, priority, value) {
            Some(resolved) => self.enforce(service, key, resolved).await,
            None => Ok(()),
        }
    }

    /// Drop `handle`'s constraint and enforce whatever remains in force.
    ///
    /// # Errors
    ///
    /// Returns the enforcing write's error.
    pub async fn release(&self, service: &UniqueId, key: &str, handle: HandleId) -> Result<(), HearthError> {
        match self.constraints.unset(service, key, handle) {
            Some(resolved) => self.enforce(service, key, resolved).await,
            None => Ok(()),
        }
    }

    async fn enforce(&self, service: &UniqueId, key: &str, value: Value) -> Result<(), HearthError> {
        let Some(target) = self.registry.service(service) else {
            tracing::debug!(service = %service, key, "constrained service not registered, deferring");
            return Ok(());
        };
        if target.value(key).as_ref() == Some(&value) {
            return Ok(());
        }
        self.handlers.dispatch(&target, key, value).await
    }

    /// Load a rule. It first runs on the hub loop.
    pub fn load_rule(&self, name: impl Into<String>, body: impl RuleBody + 'static) -> RuleId {
        let name = name.into();
        let id = self.rules.insert(name.clone(), Arc::new(body), None, true);
        tracing::info!(rule = %name, %id, "rule loaded");
        self.rules.wake(id);
        id
    }

    /// Load a scripted rule. Disabled scripts are loaded but not run.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::Validation`] for an invalid script.
    pub fn load_script(&self, script: RuleScript) -> Result<RuleId, HearthError> {
        let name = script.name.clone();
        let enabled = script.enabled;
        let body = ScriptRule::new(script)?;
        let id = self.rules.insert(name.clone(), Arc::new(body), None, enabled);
        tracing::info!(rule = %name, %id, enabled, "scripted rule loaded");
        if enabled {
            self.rules.wake(id);
        }
        Ok(id)
    }

    /// Unload a rule and everything it holds. Returns `false` if unknown.
    pub async fn unload_rule(&self, id: RuleId) -> bool {
        self.rules.unload(self, id).await
    }

    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] for an unknown rule.
    #[tracing::instrument(skip(self))]
    pub fn set_rule_enabled(&self, id: RuleId, enabled: bool) -> Result<RuleInfo, HearthError> {
        let not_found = || NotFoundError {
            entity: "Rule",
            id: id.to_string(),
        };
        if !self.rules.set_enabled(id, enabled) {
            return Err(not_found().into());
        }
        self.rules.info(id).ok_or_else(|| not_found().into())
    }

    /// Current services together with the cursor they are at least as
    /// recent as.
    #[must_use]
    pub fn services_snapshot(&self) -> (SyncCursor, BTreeMap<UniqueId, ServiceSnapshot>) {
        let cursor = self.sync.cursor();
        let services = self
            .registry
            .services()
            .into_iter()
            .map(|s| (s.unique_id().clone(), s.snapshot()))
            .collect();
        (cursor, services)
    }

    #[must_use]
    pub fn devices_snapshot(&self) -> (SyncCursor, Vec<Device>) {
        let cursor = self.sync.cursor();
        (cursor, self.devices.list())
    }

    /// Process events and rule wake-ups until [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        let mut queues = self.queues.lock().await;
        let mut stop = self.stop.subscribe();
        tracing::info!(instance = %self.sync.instance(), "hub loop started");
        loop {
            if *stop.borrow_and_update() {
                break;
            }
            let Queues { events, rules } = &mut *queues;
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                Some(event) = events.recv() => self.dispatch(event).await,
                Some(id) = rules.recv() => self.rules.execute(self, id).await,
                else => break,
            }
        }
        tracing::info!("hub loop stopped");
    }

    /// Process everything already queued, then return. Meant for embedding
    /// the hub without [`run`](Self::run), as tests do.
    pub async fn drain(&self) {
        let mut queues = self.queues.lock().await;
        loop {
            if let Ok(event) = queues.events.try_recv() {
                self.dispatch(event).await;
            } else if let Ok(id) = queues.rules.try_recv() {
                self.rules.execute(self, id).await;
            } else {
                break;
            }
        }
    }

    /// Stop the loop, unload every rule and cancel provider tasks.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);
        for id in self.rules.ids() {
            self.rules.unload(self, id).await;
        }
        for provider in self.registry.providers() {
            provider.cancel_tasks();
        }
        tracing::info!("hub shut down");
    }

    async fn dispatch(&self, event: HubEvent) {
        tracing::trace!(action = event.action(), service = %event.service(), "dispatching event");
        self.registry.apply(&event);
        let changed_device = self.devices.on_event(&event);

        if let HubEvent::Update {
            service, key, value, ..
        } = &event
        {
            if let Some(resolved) = self.constraints.on_update(service, key, value) {
                tracing::debug!(service = %service, key, "reasserting constrained value");
                if let Err(err) = self.enforce(service, key, resolved).await {
                    tracing::warn!(service = %service, key, error = %err.message(), "constraint write-back failed");
                }
            }
        }

        for id in self.rules.matching(&event, changed_device.as_ref()) {
            self.rules.execute(self, id).await;
        }

        let snapshot = match &event {
            HubEvent::Register { service } => self.registry.service(service).map(|s| s.snapshot()),
            _ => None,
        };
        self.sync.broadcast(&event, snapshot);
    }
}

impl SnapshotSource for Hub {
    async fn fetch_services(&self) -> Result<(SyncCursor, BTreeMap<UniqueId, ServiceSnapshot>), HearthError> {
        Ok(self.services_snapshot())
    }

    async fn fetch_devices(&self) -> Result<(SyncCursor, Vec<Device>), HearthError> {
        Ok(self.devices_snapshot())
    }
}
