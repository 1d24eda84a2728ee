//! Entity model — live services and the providers that own them.
//!
//! A [`Service`] wraps a [`ServiceState`] behind a lock and emits a
//! [`HubEvent`] for every observable change. The variant-specific part (how
//! a write or an action reaches the hardware) lives behind the
//! [`ServiceBackend`] trait.
//!
//! A [`Provider`] groups the services of one integration, owns its
//! background [`Task`]s, and forwards events to the registry once it is
//! attached to one.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use hearth_domain::error::{HearthError, NotImplementedError, ValidationError};
use hearth_domain::event::HubEvent;
use hearth_domain::id::UniqueId;
use hearth_domain::identifier::Identifier;
use hearth_domain::schema::{ActionSchema, EventSchema, PropertySchema};
use hearth_domain::service::{ServiceSnapshot, ServiceState};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::scheduler::Task;

/// Inbound side of the hub's event queue.
pub type EventSink = mpsc::UnboundedSender<HubEvent>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared, late-bound event sink. Events emitted while detached are dropped;
/// the registry replays current state when it attaches.
#[derive(Debug, Clone, Default)]
struct Emitter {
    sink: Arc<Mutex<Option<EventSink>>>,
}

impl Emitter {
    fn attach(&self, sink: EventSink) {
        *lock(&self.sink) = Some(sink);
    }

    fn detach(&self) {
        *lock(&self.sink) = None;
    }

    fn emit(&self, event: HubEvent) {
        if let Some(sink) = lock(&self.sink).as_ref() {
            if sink.send(event).is_err() {
                tracing::debug!("event queue closed, dropping event");
            }
        }
    }
}

/// How writes and actions reach a service's device.
///
/// Both operations default to [`HearthError::NotImplemented`], which is what
/// passive services (sensors) keep.
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    /// Apply a write. Implementations confirm it by calling
    /// [`Service::update_value`] once the device reports the new value.
    async fn set_value(&self, service: &Service, key: &str, value: Value) -> Result<(), HearthError> {
        let _ = (key, value);
        Err(NotImplementedError {
            operation: "setValue",
            service: service.unique_id().to_string(),
        }
        .into())
    }

    async fn trigger_action(
        &self,
        service: &Service,
        action: &str,
        args: Value,
    ) -> Result<Value, HearthError> {
        let _ = (action, args);
        Err(NotImplementedError {
            operation: "triggerAction",
            service: service.unique_id().to_string(),
        }
        .into())
    }
}

/// Backend of read-only services.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passive;

#[async_trait]
impl ServiceBackend for Passive {}

/// A live, controllable unit.
pub struct Service {
    unique_id: UniqueId,
    state: Mutex<ServiceState>,
    backend: Arc<dyn ServiceBackend>,
    emitter: Emitter,
    registered: AtomicBool,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("unique_id", &self.unique_id)
            .field("registered", &self.is_registered())
            .finish_non_exhaustive()
    }
}

impl Service {
    fn new(unique_id: UniqueId, name: String, backend: Arc<dyn ServiceBackend>, emitter: Emitter) -> Self {
        Self {
            state: Mutex::new(ServiceState::new(unique_id.clone(), name)),
            unique_id,
            backend,
            emitter,
            registered: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn unique_id(&self) -> &UniqueId {
        &self.unique_id
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Read the state under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&ServiceState) -> R) -> R {
        f(&lock(&self.state))
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.read(|s| s.name.clone())
    }

    #[must_use]
    pub fn value(&self, key: &str) -> Option<Value> {
        self.read(|s| s.value(key).cloned())
    }

    #[must_use]
    pub fn identifiers(&self) -> Vec<Identifier> {
        self.read(|s| s.identifiers().to_vec())
    }

    #[must_use]
    pub fn snapshot(&self) -> ServiceSnapshot {
        self.read(ServiceState::snapshot)
    }

    pub fn set_name(&self, name: impl Into<String>) {
        lock(&self.state).name = name.into();
    }

    pub fn set_priority(&self, priority: i32) {
        lock(&self.state).priority = priority;
    }

    pub fn register_property(&self, key: impl Into<String>, schema: PropertySchema) {
        lock(&self.state).register_property(key, schema);
    }

    pub fn register_action(&self, key: impl Into<String>, schema: ActionSchema) {
        lock(&self.state).register_action(key, schema);
    }

    pub fn register_event(&self, key: impl Into<String>, schema: EventSchema) {
        lock(&self.state).register_event(key, schema);
    }

    pub fn register_type(&self, kind: impl Into<String>) {
        lock(&self.state).register_type(kind);
    }

    pub fn update_types(&self, types: impl IntoIterator<Item = String>) {
        lock(&self.state).update_types(types);
    }

    /// Add an identifier; emits `identifier` when it is new.
    pub fn register_identifier(&self, identifier: Identifier) {
        let added = lock(&self.state).register_identifier(identifier.clone());
        if added {
            self.emit(HubEvent::Identifier {
                service: self.unique_id.clone(),
                identifier,
            });
        }
    }

    /// Replace the identifier set; emits `identifier` for each new one.
    /// Dropped identifiers do not split an already merged device.
    pub fn update_identifiers(&self, identifiers: Vec<Identifier>) {
        let added = lock(&self.state).update_identifiers(identifiers);
        for identifier in added {
            self.emit(HubEvent::Identifier {
                service: self.unique_id.clone(),
                identifier,
            });
        }
    }

    /// Record a value reported by the device. Emits `update` unless the
    /// value is unchanged. Returns whether it changed.
    pub fn update_value(&self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        let change = lock(&self.state).update_value(key.clone(), value);
        match change {
            Some(change) => {
                self.emit(HubEvent::Update {
                    service: self.unique_id.clone(),
                    key,
                    value: change.value,
                    old_value: change.old_value,
                });
                true
            }
            None => false,
        }
    }

    /// Fire one of the service's events.
    pub fn emit_event(&self, key: impl Into<String>, args: Value) {
        self.emit(HubEvent::Event {
            service: self.unique_id.clone(),
            key: key.into(),
            args,
        });
    }

    /// Ask the backend to write a value. The hub routes writes through the
    /// handler chain first; call this directly only to bypass it.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports, [`HearthError::NotImplemented`] for
    /// passive services.
    pub async fn set_value(&self, key: &str, value: Value) -> Result<(), HearthError> {
        self.backend.set_value(self, key, value).await
    }

    /// Ask the backend to run an action.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports, [`HearthError::NotImplemented`] when the
    /// variant has no actions.
    pub async fn trigger_action(&self, action: &str, args: Value) -> Result<Value, HearthError> {
        self.backend.trigger_action(self, action, args).await
    }

    /// Events describing the current state: `register`, one `identifier` per
    /// identifier, one `update` per value (with no previous value).
    #[must_use]
    pub fn announcement(&self) -> Vec<HubEvent> {
        let (identifiers, values) = self.read(|s| (s.identifiers().to_vec(), s.values().clone()));
        let mut events = Vec::with_capacity(1 + identifiers.len() + values.len());
        events.push(HubEvent::Register {
            service: self.unique_id.clone(),
        });
        events.extend(identifiers.into_iter().map(|identifier| HubEvent::Identifier {
            service: self.unique_id.clone(),
            identifier,
        }));
        events.extend(values.into_iter().map(|(key, value)| HubEvent::Update {
            service: self.unique_id.clone(),
            key,
            value,
            old_value: None,
        }));
        events
    }

    fn emit(&self, event: HubEvent) {
        if self.is_registered() {
            self.emitter.emit(event);
        }
    }
}

/// One integration's set of services, plus its background tasks.
#[derive(Debug)]
pub struct Provider {
    id: String,
    services: Mutex<BTreeMap<String, Arc<Service>>>,
    tasks: Mutex<HashMap<String, Task>>,
    emitter: Emitter,
}

impl Provider {
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyName`] for an empty id and
    /// [`ValidationError::MalformedUniqueId`] when it contains `:`.
    pub fn new(id: impl Into<String>) -> Result<Self, HearthError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if id.contains(':') {
            return Err(ValidationError::MalformedUniqueId(id).into());
        }
        Ok(Self {
            id,
            services: Mutex::new(BTreeMap::new()),
            tasks: Mutex::new(HashMap::new()),
            emitter: Emitter::default(),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Build a service bound to this provider. It stays silent until
    /// [`register_service`](Self::register_service) is called, so it can be
    /// fully described first.
    pub fn create_service(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        backend: Arc<dyn ServiceBackend>,
    ) -> Arc<Service> {
        Arc::new(Service::new(
            UniqueId::new(self.id.clone(), id),
            name.into(),
            backend,
            self.emitter.clone(),
        ))
    }

    /// Make a service visible. A previous service with the same id is
    /// unregistered first.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedUniqueId`] when the service was
    /// created by another provider.
    pub fn register_service(&self, service: Arc<Service>) -> Result<(), HearthError> {
        if service.unique_id().provider() != self.id {
            return Err(ValidationError::MalformedUniqueId(service.unique_id().to_string()).into());
        }
        let key = service.unique_id().service().to_string();
        if let Some(previous) = lock(&self.services).remove(&key) {
            self.retire(&previous);
        }
        service.registered.store(true, Ordering::Release);
        lock(&self.services).insert(key, Arc::clone(&service));
        for event in service.announcement() {
            self.emitter.emit(event);
        }
        Ok(())
    }

    /// Remove a service; emits `unregister`.
    pub fn unregister_service(&self, id: &str) -> Option<Arc<Service>> {
        let service = lock(&self.services).remove(id)?;
        self.retire(&service);
        Some(service)
    }

    /// Unregister every service.
    pub fn clear_services(&self) {
        let services = std::mem::take(&mut *lock(&self.services));
        for service in services.values() {
            self.retire(service);
        }
    }

    #[must_use]
    pub fn service(&self, id: &str) -> Option<Arc<Service>> {
        lock(&self.services).get(id).cloned()
    }

    #[must_use]
    pub fn services(&self) -> Vec<Arc<Service>> {
        lock(&self.services).values().cloned().collect()
    }

    /// Keep a background task alive with this provider. A task with the same
    /// name is cancelled and replaced.
    pub fn add_task(&self, task: Task) {
        if let Some(previous) = lock(&self.tasks).insert(task.name().to_string(), task) {
            previous.cancel();
        }
    }

    /// Returns `true` when a task with that name existed.
    pub fn cancel_task(&self, name: &str) -> bool {
        match lock(&self.tasks).remove(name) {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_tasks(&self) {
        for (_, task) in lock(&self.tasks).drain() {
            task.cancel();
        }
    }

    pub(crate) fn attach(&self, sink: EventSink) {
        self.emitter.attach(sink);
    }

    pub(crate) fn detach(&self) {
        self.emitter.detach();
    }

    fn retire(&self, service: &Service) {
        service.registered.store(false, Ordering::Release);
        self.emitter.emit(HubEvent::Unregister {
            service: service.unique_id().clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_domain::schema::PropertyType;
    use serde_json::json;

    fn attached(provider: &Provider) -> mpsc::UnboundedReceiver<HubEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        provider.attach(tx);
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<HubEvent>) -> Vec<HubEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn should_reject_provider_id_with_colon() {
        assert!(Provider::new("a:b").is_err());
        assert!(Provider::new(" ").is_err());
    }

    #[test]
    fn should_stay_silent_until_registered() {
        let provider = Provider::new("virtual").unwrap();
        let mut rx = attached(&provider);
        let service = provider.create_service("light", "Light", Arc::new(Passive));
        service.update_value("on", json!(false));
        service.register_identifier("mac:aa".parse().unwrap());
        assert!(drain(&mut rx).is_empty());

        provider.register_service(Arc::clone(&service)).unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].action(), "register");
        assert_eq!(events[1].action(), "identifier");
        assert_eq!(
            events[2],
            HubEvent::Update {
                service: UniqueId::new("virtual", "light"),
                key: "on".to_string(),
                value: json!(false),
                old_value: None,
            }
        );
    }

    #[test]
    fn should_emit_update_only_when_value_changes() {
        let provider = Provider::new("virtual").unwrap();
        let mut rx = attached(&provider);
        let service = provider.create_service("light", "Light", Arc::new(Passive));
        provider.register_service(Arc::clone(&service)).unwrap();
        drain(&mut rx);

        assert!(service.update_value("on", json!(true)));
        assert!(!service.update_value("on", json!(true)));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn should_emit_only_new_identifiers_on_update() {
        let provider = Provider::new("p").unwrap();
        let mut rx = attached(&provider);
        let service = provider.create_service("s", "S", Arc::new(Passive));
        provider.register_service(Arc::clone(&service)).unwrap();
        service.register_identifier("mac:aa".parse().unwrap());
        drain(&mut rx);

        service.update_identifiers(vec!["mac:aa".parse().unwrap(), "serial:1".parse().unwrap()]);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![HubEvent::Identifier {
                service: UniqueId::new("p", "s"),
                identifier: "serial:1".parse().unwrap(),
            }]
        );
    }

    #[test]
    fn should_emit_unregister_and_silence_removed_service() {
        let provider = Provider::new("p").unwrap();
        let mut rx = attached(&provider);
        let service = provider.create_service("s", "S", Arc::new(Passive));
        provider.register_service(Arc::clone(&service)).unwrap();
        drain(&mut rx);

        assert!(provider.unregister_service("s").is_some());
        service.update_value("on", json!(true));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action(), "unregister");
        assert!(provider.service("s").is_none());
    }

    #[test]
    fn should_reject_service_from_another_provider() {
        let a = Provider::new("a").unwrap();
        let b = Provider::new("b").unwrap();
        let service = b.create_service("s", "S", Arc::new(Passive));
        assert!(a.register_service(service).is_err());
    }

    #[tokio::test]
    async fn should_report_not_implemented_for_passive_writes() {
        let provider = Provider::new("p").unwrap();
        let service = provider.create_service("sensor", "Sensor", Arc::new(Passive));
        service.register_property("power", PropertySchema::new(PropertyType::Number).read_only());

        let err = service.set_value("power", json!(1)).await.unwrap_err();
        assert!(matches!(err, HearthError::NotImplemented(_)));
        let err = service.trigger_action("reset", Value::Null).await.unwrap_err();
        assert!(matches!(err, HearthError::NotImplemented(_)));
    }
}
