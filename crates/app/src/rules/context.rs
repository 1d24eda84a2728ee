//! What a rule body sees while it runs.
//!
//! Every read through the [`RuleContext`] is recorded as a watch, and the
//! rule re-runs when a watched thing changes. Effects (constraints, writes,
//! handlers, timers, sub-rules) are collected during the body and applied by
//! the engine once it returns, so bodies stay synchronous.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use hearth_domain::device::Device;
use hearth_domain::error::HearthError;
use hearth_domain::event::HubEvent;
use hearth_domain::id::{DeviceKey, RuleId, UniqueId};
use hearth_domain::identifier::Identifier;
use hearth_domain::service::ServiceSnapshot;
use serde_json::Value;
use tokio::time::Instant;

use crate::devices::Devices;
use crate::handlers::WriteHandler;
use crate::registry::Registry;

/// Body of a rule. Runs on every (re-)execution.
pub trait RuleBody: Send + Sync {
    /// # Errors
    ///
    /// An error is logged and recorded on the rule. Effects collected before
    /// the error are still applied.
    fn run(&self, ctx: &mut RuleContext<'_>) -> Result<(), HearthError>;
}

impl<F> RuleBody for F
where
    F: Fn(&mut RuleContext<'_>) -> Result<(), HearthError> + Send + Sync,
{
    fn run(&self, ctx: &mut RuleContext<'_>) -> Result<(), HearthError> {
        self(ctx)
    }
}

/// Pin a closure's signature so it can be used as a [`RuleBody`].
pub fn rule_fn<F>(body: F) -> F
where
    F: Fn(&mut RuleContext<'_>) -> Result<(), HearthError> + Send + Sync,
{
    body
}

/// Things a rule read during its last run.
#[derive(Debug, Clone, Default)]
pub(crate) struct Watches {
    services: HashSet<UniqueId>,
    properties: HashSet<(UniqueId, String)>,
    devices: HashSet<DeviceKey>,
    identifiers: HashSet<Identifier>,
}

impl Watches {
    pub(crate) fn matches(&self, event: &HubEvent, changed_device: Option<&DeviceKey>) -> bool {
        if changed_device.is_some_and(|key| self.devices.contains(key)) {
            return true;
        }
        match event {
            HubEvent::Register { service } | HubEvent::Unregister { service } => {
                self.services.contains(service)
            }
            HubEvent::Update { service, key, .. } => {
                self.properties.contains(&(service.clone(), key.clone()))
            }
            HubEvent::Identifier { identifier, .. } => self.identifiers.contains(identifier),
            HubEvent::Event { .. } => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.services.len() + self.properties.len() + self.devices.len() + self.identifiers.len()
    }
}

pub(crate) struct Claim {
    pub service: UniqueId,
    pub key: String,
    pub value: Value,
    pub priority: i32,
}

pub(crate) struct Invocation {
    pub service: UniqueId,
    pub key: String,
    pub value: Value,
}

/// Side effects requested by a body, applied after it returns.
#[derive(Default)]
pub(crate) struct Effects {
    pub constraints: Vec<Claim>,
    pub writes: Vec<Invocation>,
    pub triggers: Vec<Invocation>,
    pub handlers: Vec<(UniqueId, String, Arc<dyn WriteHandler>)>,
    pub next_run: Option<Instant>,
    pub sub_rules: Vec<(String, Arc<dyn RuleBody>)>,
    pub unload: bool,
}

/// Handle given to a [`RuleBody`].
pub struct RuleContext<'a> {
    rule: RuleId,
    name: &'a str,
    registry: &'a Registry,
    devices: &'a Devices,
    watches: Watches,
    effects: Effects,
}

impl<'a> RuleContext<'a> {
    pub(crate) fn new(rule: RuleId, name: &'a str, registry: &'a Registry, devices: &'a Devices) -> Self {
        Self {
            rule,
            name,
            registry,
            devices,
            watches: Watches::default(),
            effects: Effects::default(),
        }
    }

    pub(crate) fn finish(self) -> (Watches, Effects) {
        (self.watches, self.effects)
    }

    #[must_use]
    pub fn rule_id(&self) -> RuleId {
        self.rule
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// Current value of a property. Watches the property and the service's
    /// registration.
    pub fn value(&mut self, service: &UniqueId, key: &str) -> Option<Value> {
        self.watches.services.insert(service.clone());
        self.watches
            .properties
            .insert((service.clone(), key.to_string()));
        self.registry.service(service).and_then(|s| s.value(key))
    }

    /// Full description of a service. Watches its registration.
    pub fn service(&mut self, service: &UniqueId) -> Option<ServiceSnapshot> {
        self.watches.services.insert(service.clone());
        self.registry.service(service).map(|s| s.snapshot())
    }

    /// The device a service belongs to. Watches the service and, when found,
    /// the device.
    pub fn device_of(&mut self, service: &UniqueId) -> Option<Device> {
        self.watches.services.insert(service.clone());
        let device = self.devices.device_of(service)?;
        self.watches.devices.insert(device.key.clone());
        Some(device)
    }

    /// The device owning an identifier. Watches the identifier and, when
    /// found, the device.
    pub fn device(&mut self, identifier: &Identifier) -> Option<Device> {
        self.watches.identifiers.insert(identifier.clone());
        let device = self.devices.device_for(identifier)?;
        self.watches.devices.insert(device.key.clone());
        Some(device)
    }

    /// Hold a property at `value` while this rule keeps claiming it. A claim
    /// not repeated on the next run is released.
    pub fn constrain(&mut self, service: &UniqueId, key: impl Into<String>, value: Value, priority: i32) {
        self.effects.constraints.push(Claim {
            service: service.clone(),
            key: key.into(),
            value,
            priority,
        });
    }

    /// One-off write through the handler chain.
    pub fn set(&mut self, service: &UniqueId, key: impl Into<String>, value: Value) {
        self.effects.writes.push(Invocation {
            service: service.clone(),
            key: key.into(),
            value,
        });
    }

    pub fn trigger(&mut self, service: &UniqueId, action: impl Into<String>, args: Value) {
        self.effects.triggers.push(Invocation {
            service: service.clone(),
            key: action.into(),
            value: args,
        });
    }

    /// Intercept writes to a property for as long as this run's effects
    /// last (until the next run or unload).
    pub fn intercept(&mut self, service: &UniqueId, key: impl Into<String>, handler: Arc<dyn WriteHandler>) {
        self.effects
            .handlers
            .push((service.clone(), key.into(), handler));
    }

    /// Re-run after `delay`. The earliest request of a run wins. A delay
    /// past the clock's range schedules nothing.
    pub fn run_in(&mut self, delay: Duration) {
        match Instant::now().checked_add(delay) {
            Some(at) => self.run_at(at),
            None => tracing::warn!(rule = %self.name, ?delay, "re-run delay out of range, not scheduled"),
        }
    }

    pub fn run_at(&mut self, at: Instant) {
        self.effects.next_run = Some(match self.effects.next_run {
            Some(current) => current.min(at),
            None => at,
        });
    }

    /// Start a child rule. It is unloaded when this rule re-runs or unloads.
    pub fn spawn(&mut self, name: impl Into<String>, body: impl RuleBody + 'static) {
        self.effects.sub_rules.push((name.into(), Arc::new(body)));
    }

    /// Unload this rule once the current run completes.
    pub fn unload(&mut self) {
        self.effects.unload = true;
    }
}
