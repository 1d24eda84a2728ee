//! Devices — keeps the inferred device index in step with the event stream.

use std::sync::{Mutex, MutexGuard, PoisonError};

use hearth_domain::device::{Device, DeviceIndex, MergeOutcome};
use hearth_domain::event::HubEvent;
use hearth_domain::id::{DeviceKey, UniqueId};
use hearth_domain::identifier::Identifier;

/// Live device index.
#[derive(Debug, Default)]
pub struct Devices {
    index: Mutex<DeviceIndex>,
}

impl Devices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&self) -> MutexGuard<'_, DeviceIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply an event. Returns the device whose membership or identifiers
    /// changed, if any.
    pub fn on_event(&self, event: &HubEvent) -> Option<DeviceKey> {
        match event {
            HubEvent::Identifier {
                service,
                identifier,
            } => {
                let outcome = self.index().apply(service, identifier);
                match &outcome {
                    MergeOutcome::Created(key) => {
                        tracing::debug!(service = %service, device = %key, "device created");
                    }
                    MergeOutcome::Joined(key) => {
                        tracing::debug!(service = %service, device = %key, "service joined device");
                    }
                    MergeOutcome::Extended(key) => {
                        tracing::debug!(device = %key, identifier = %identifier, "device extended");
                    }
                    MergeOutcome::Unchanged(_) => {}
                    MergeOutcome::Conflict { device, owner } => {
                        tracing::warn!(
                            service = %service,
                            identifier = %identifier,
                            device = %device,
                            owner = %owner,
                            "identifier already belongs to another device"
                        );
                    }
                }
                outcome.changed_device().cloned()
            }
            HubEvent::Unregister { service } => self.index().remove_service(service),
            HubEvent::Register { .. } | HubEvent::Update { .. } | HubEvent::Event { .. } => None,
        }
    }

    #[must_use]
    pub fn device(&self, key: &DeviceKey) -> Option<Device> {
        self.index().device(key).cloned()
    }

    #[must_use]
    pub fn device_of(&self, service: &UniqueId) -> Option<Device> {
        self.index().device_of(service).cloned()
    }

    #[must_use]
    pub fn device_for(&self, identifier: &Identifier) -> Option<Device> {
        self.index().device_for(identifier).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<Device> {
        self.index().devices().cloned().collect()
    }
}
