//! Device — an inferred cluster of services believed to be the same physical
//! object.
//!
//! Devices are never authored. [`DeviceIndex`] grows them incrementally from
//! `(service, identifier)` reports: the first identifier seen creates a
//! device keyed by that identifier, later reports sharing an identifier join
//! it. The union is append-only and never splits.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::id::{DeviceKey, UniqueId};
use crate::identifier::Identifier;

/// A merged device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(skip)]
    pub key: DeviceKey,
    pub services: BTreeSet<UniqueId>,
    pub identifiers: BTreeSet<Identifier>,
}

impl Device {
    fn new(key: DeviceKey) -> Self {
        Self {
            key,
            services: BTreeSet::new(),
            identifiers: BTreeSet::new(),
        }
    }
}

/// What [`DeviceIndex::apply`] did with a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Neither the service nor the identifier was known: new device.
    Created(DeviceKey),
    /// The service's device gained a new identifier.
    Extended(DeviceKey),
    /// The service joined the device owning the identifier.
    Joined(DeviceKey),
    /// Already recorded.
    Unchanged(DeviceKey),
    /// The service belongs to `device` but the identifier is owned by
    /// `owner`. Left unresolved.
    Conflict { device: DeviceKey, owner: DeviceKey },
}

impl MergeOutcome {
    /// The device the report ended up affecting, if any.
    #[must_use]
    pub fn changed_device(&self) -> Option<&DeviceKey> {
        match self {
            Self::Created(key) | Self::Extended(key) | Self::Joined(key) => Some(key),
            Self::Unchanged(_) | Self::Conflict { .. } => None,
        }
    }
}

/// Incremental union of services into devices by shared identifiers.
#[derive(Debug, Clone, Default)]
pub struct DeviceIndex {
    devices: BTreeMap<DeviceKey, Device>,
    by_identifier: HashMap<Identifier, DeviceKey>,
    by_service: HashMap<UniqueId, DeviceKey>,
}

impl DeviceIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `service` reported `identifier`.
    pub fn apply(&mut self, service: &UniqueId, identifier: &Identifier) -> MergeOutcome {
        let owner = self.by_identifier.get(identifier).cloned();
        let current = self.by_service.get(service).cloned();

        match (current, owner) {
            (Some(device), Some(owner)) if device == owner => MergeOutcome::Unchanged(device),
            (Some(device), Some(owner)) => MergeOutcome::Conflict { device, owner },
            (Some(device), None) => {
                self.by_identifier.insert(identifier.clone(), device.clone());
                if let Some(entry) = self.devices.get_mut(&device) {
                    entry.identifiers.insert(identifier.clone());
                }
                MergeOutcome::Extended(device)
            }
            (None, Some(owner)) => {
                self.by_service.insert(service.clone(), owner.clone());
                if let Some(entry) = self.devices.get_mut(&owner) {
                    entry.services.insert(service.clone());
                }
                MergeOutcome::Joined(owner)
            }
            (None, None) => {
                let key = DeviceKey::new(identifier.to_string());
                let mut device = Device::new(key.clone());
                device.services.insert(service.clone());
                device.identifiers.insert(identifier.clone());
                self.devices.insert(key.clone(), device);
                self.by_identifier.insert(identifier.clone(), key.clone());
                self.by_service.insert(service.clone(), key.clone());
                MergeOutcome::Created(key)
            }
        }
    }

    /// Forget a service. Its device keeps the identifiers it accumulated and
    /// is dropped only once no service is left in it. Returns the device the
    /// service belonged to.
    pub fn remove_service(&mut self, service: &UniqueId) -> Option<DeviceKey> {
        let key = self.by_service.remove(service)?;
        let emptied = match self.devices.get_mut(&key) {
            Some(device) => {
                device.services.remove(service);
                device.services.is_empty()
            }
            None => false,
        };
        if emptied {
            if let Some(device) = self.devices.remove(&key) {
                for identifier in &device.identifiers {
                    self.by_identifier.remove(identifier);
                }
            }
        }
        Some(key)
    }

    /// Seed an index with already merged devices, as fetched from a snapshot.
    pub fn from_devices<I>(devices: I) -> Self
    where
        I: IntoIterator<Item = Device>,
    {
        let mut index = Self::new();
        for device in devices {
            for identifier in &device.identifiers {
                index.by_identifier.insert(identifier.clone(), device.key.clone());
            }
            for service in &device.services {
                index.by_service.insert(service.clone(), device.key.clone());
            }
            index.devices.insert(device.key.clone(), device);
        }
        index
    }

    #[must_use]
    pub fn device(&self, key: &DeviceKey) -> Option<&Device> {
        self.devices.get(key)
    }

    /// The device a service belongs to.
    #[must_use]
    pub fn device_of(&self, service: &UniqueId) -> Option<&Device> {
        self.by_service
            .get(service)
            .and_then(|key| self.devices.get(key))
    }

    /// The device owning an identifier.
    #[must_use]
    pub fn device_for(&self, identifier: &Identifier) -> Option<&Device> {
        self.by_identifier
            .get(identifier)
            .and_then(|key| self.devices.get(key))
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
