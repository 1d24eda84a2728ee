//! Registry — the authoritative map of providers and registered services.
//!
//! Providers attached here forward their events into the hub's queue. The
//! service index itself is maintained from those events by the hub loop
//! ([`Registry::apply`]), so every component sees the same ordering.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hearth_domain::error::{HearthError, NotFoundError, ValidationError};
use hearth_domain::event::HubEvent;
use hearth_domain::id::UniqueId;

use crate::provider::{EventSink, Provider, Service};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ServiceIndex {
    next_seq: u64,
    entries: HashMap<UniqueId, (u64, Arc<Service>)>,
}

/// Providers and services known to the hub.
#[derive(Debug)]
pub struct Registry {
    sink: EventSink,
    providers: Mutex<BTreeMap<String, Arc<Provider>>>,
    services: Mutex<ServiceIndex>,
}

impl Registry {
    #[must_use]
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            providers: Mutex::new(BTreeMap::new()),
            services: Mutex::new(ServiceIndex::default()),
        }
    }

    /// Attach a provider. Services it already holds are replayed as
    /// `register`, `identifier` and `update` events.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidRequest`] if a provider with the
    /// same id is already attached.
    pub fn add_provider(&self, provider: Arc<Provider>) -> Result<(), HearthError> {
        {
            let mut providers = lock(&self.providers);
            if providers.contains_key(provider.id()) {
                return Err(ValidationError::InvalidRequest(format!(
                    "provider {:?} already registered",
                    provider.id()
                ))
                .into());
            }
            providers.insert(provider.id().to_string(), Arc::clone(&provider));
        }
        provider.attach(self.sink.clone());
        for service in provider.services() {
            for event in service.announcement() {
                if self.sink.send(event).is_err() {
                    tracing::debug!("event queue closed during replay");
                }
            }
        }
        tracing::info!(provider = %provider.id(), "provider registered");
        Ok(())
    }

    /// Detach a provider: its tasks are cancelled and its services
    /// unregistered.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] if no provider has that id.
    pub fn remove_provider(&self, id: &str) -> Result<Arc<Provider>, HearthError> {
        let provider = lock(&self.providers).remove(id).ok_or_else(|| NotFoundError {
            entity: "Provider",
            id: id.to_string(),
        })?;
        provider.cancel_tasks();
        provider.clear_services();
        provider.detach();
        tracing::info!(provider = %id, "provider removed");
        Ok(provider)
    }

    #[must_use]
    pub fn provider(&self, id: &str) -> Option<Arc<Provider>> {
        lock(&self.providers).get(id).cloned()
    }

    #[must_use]
    pub fn providers(&self) -> Vec<Arc<Provider>> {
        lock(&self.providers).values().cloned().collect()
    }

    #[must_use]
    pub fn service(&self, id: &UniqueId) -> Option<Arc<Service>> {
        lock(&self.services).entries.get(id).map(|(_, s)| Arc::clone(s))
    }

    /// Resolve a service or fail with [`NotFoundError`].
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] when the id is not registered.
    pub fn require(&self, id: &UniqueId) -> Result<Arc<Service>, HearthError> {
        self.service(id).ok_or_else(|| {
            NotFoundError {
                entity: "Service",
                id: id.to_string(),
            }
            .into()
        })
    }

    /// Registered services, in registration order.
    #[must_use]
    pub fn services(&self) -> Vec<Arc<Service>> {
        let index = lock(&self.services);
        let mut entries: Vec<_> = index.entries.values().collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, s)| Arc::clone(s)).collect()
    }

    /// Bring the service index in line with an event.
    pub(crate) fn apply(&self, event: &HubEvent) {
        match event {
            HubEvent::Register { service } => {
                let live = self
                    .provider(service.provider())
                    .and_then(|p| p.service(service.service()));
                match live {
                    Some(live) => {
                        let mut index = lock(&self.services);
                        let seq = index.next_seq;
                        index.next_seq += 1;
                        index.entries.insert(service.clone(), (seq, live));
                        tracing::debug!(service = %service, "service registered");
                    }
                    None => tracing::debug!(service = %service, "register for a service already gone"),
                }
            }
            HubEvent::Unregister { service } => {
                if lock(&self.services).entries.remove(service).is_some() {
                    tracing::debug!(service = %service, "service unregistered");
                }
            }
            HubEvent::Identifier { .. } | HubEvent::Update { .. } | HubEvent::Event { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Passive;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn registry() -> (Registry, mpsc::UnboundedReceiver<HubEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Registry::new(tx), rx)
    }

    fn pump(registry: &Registry, rx: &mut mpsc::UnboundedReceiver<HubEvent>) -> Vec<HubEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            registry.apply(&event);
            events.push(event);
        }
        events
    }

    #[test]
    fn should_replay_existing_services_when_provider_is_added() {
        let (registry, mut rx) = registry();
        let provider = Arc::new(Provider::new("virtual").unwrap());
        let service = provider.create_service("light", "Light", Arc::new(Passive));
        service.update_value("on", json!(true));
        service.register_identifier("mac:aa".parse().unwrap());
        provider.register_service(service).unwrap();

        registry.add_provider(Arc::clone(&provider)).unwrap();
        let events = pump(&registry, &mut rx);

        let actions: Vec<_> = events.iter().map(HubEvent::action).collect();
        assert_eq!(actions, vec!["register", "identifier", "update"]);
        assert!(matches!(&events[2], HubEvent::Update { old_value: None, .. }));
        assert!(registry.service(&UniqueId::new("virtual", "light")).is_some());
    }

    #[test]
    fn should_forward_events_of_attached_provider() {
        let (registry, mut rx) = registry();
        let provider = Arc::new(Provider::new("p").unwrap());
        registry.add_provider(Arc::clone(&provider)).unwrap();

        let service = provider.create_service("s", "S", Arc::new(Passive));
        provider.register_service(Arc::clone(&service)).unwrap();
        service.update_value("level", json!(3));
        let events = pump(&registry, &mut rx);

        assert_eq!(events.len(), 2);
        assert_eq!(registry.services().len(), 1);
    }

    #[test]
    fn should_reject_duplicate_provider() {
        let (registry, _rx) = registry();
        registry.add_provider(Arc::new(Provider::new("p").unwrap())).unwrap();
        let err = registry
            .add_provider(Arc::new(Provider::new("p").unwrap()))
            .unwrap_err();
        assert!(matches!(err, HearthError::Validation(_)));
    }

    #[test]
    fn should_unregister_services_of_removed_provider() {
        let (registry, mut rx) = registry();
        let provider = Arc::new(Provider::new("p").unwrap());
        registry.add_provider(Arc::clone(&provider)).unwrap();
        provider
            .register_service(provider.create_service("s", "S", Arc::new(Passive)))
            .unwrap();
        pump(&registry, &mut rx);

        registry.remove_provider("p").unwrap();
        let events = pump(&registry, &mut rx);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action(), "unregister");
        assert!(registry.services().is_empty());
        assert!(registry.provider("p").is_none());
    }

    #[test]
    fn should_list_services_in_registration_order() {
        let (registry, mut rx) = registry();
        let provider = Arc::new(Provider::new("p").unwrap());
        registry.add_provider(Arc::clone(&provider)).unwrap();
        for id in ["zeta", "alpha", "mid"] {
            provider
                .register_service(provider.create_service(id, id, Arc::new(Passive)))
                .unwrap();
        }
        pump(&registry, &mut rx);

        let ids: Vec<_> = registry
            .services()
            .iter()
            .map(|s| s.unique_id().service().to_string())
            .collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn should_fail_require_for_unknown_service() {
        let (registry, _rx) = registry();
        let err = registry.require(&UniqueId::new("p", "missing")).unwrap_err();
        assert!(matches!(err, HearthError::NotFound(_)));
    }
}
