//! Synchronization frames — what remote observers receive.
//!
//! Every broadcast event carries the hub's `instance` (fixed for the life of
//! the process) and a monotonically increasing `counter`. Snapshot pulls
//! report the same pair so a client can tell which frames are already
//! reflected in what it fetched.

use serde::{Deserialize, Serialize};

use crate::event::HubEvent;
use crate::id::{InstanceId, UniqueId};
use crate::identifier::Identifier;
use crate::service::ServiceSnapshot;

/// Position of the server's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub instance: InstanceId,
    pub counter: u64,
}

/// One streamed frame: `{instance, counter, action, ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFrame {
    pub instance: InstanceId,
    pub counter: u64,
    #[serde(flatten)]
    pub payload: SyncPayload,
}

impl SyncFrame {
    #[must_use]
    pub fn cursor(&self) -> SyncCursor {
        SyncCursor {
            instance: self.instance,
            counter: self.counter,
        }
    }
}

/// Action-specific part of a [`SyncFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum SyncPayload {
    Register {
        id: UniqueId,
        service: ServiceSnapshot,
    },
    Unregister {
        id: UniqueId,
    },
    Identifier {
        id: UniqueId,
        identifier: Identifier,
    },
    Update {
        id: UniqueId,
        key: String,
        value: serde_json::Value,
        #[serde(rename = "oldValue", default)]
        old_value: Option<serde_json::Value>,
    },
    Event {
        id: UniqueId,
        key: String,
        args: serde_json::Value,
    },
}

impl SyncPayload {
    /// Build the payload for a hub event. `register` needs the service
    /// description, supplied by the caller because events only carry ids.
    #[must_use]
    pub fn from_event(event: &HubEvent, snapshot: Option<ServiceSnapshot>) -> Self {
        match event {
            HubEvent::Register { service } => Self::Register {
                id: service.clone(),
                service: snapshot.unwrap_or_default(),
            },
            HubEvent::Unregister { service } => Self::Unregister {
                id: service.clone(),
            },
            HubEvent::Identifier {
                service,
                identifier,
            } => Self::Identifier {
                id: service.clone(),
                identifier: identifier.clone(),
            },
            HubEvent::Update {
                service,
                key,
                value,
                old_value,
            } => Self::Update {
                id: service.clone(),
                key: key.clone(),
                value: value.clone(),
                old_value: old_value.clone(),
            },
            HubEvent::Event { service, key, args } => Self::Event {
                id: service.clone(),
                key: key.clone(),
                args: args.clone(),
            },
        }
    }
}
