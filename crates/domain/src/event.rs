//! Hub events — everything that flows over the registry bus.
//!
//! Providers emit these when their services change; the registry forwards
//! them to every component (devices, constraints, rules, sync) in order.

use serde::{Deserialize, Serialize};

use crate::id::UniqueId;
use crate::identifier::Identifier;

/// One notification on the process-wide bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum HubEvent {
    /// A service became available.
    Register { service: UniqueId },
    /// A service went away.
    Unregister { service: UniqueId },
    /// A service reported an identifier for the first time.
    Identifier {
        service: UniqueId,
        identifier: Identifier,
    },
    /// A property value changed. `old_value` is `None` on first report and
    /// for replayed values.
    Update {
        service: UniqueId,
        key: String,
        value: serde_json::Value,
        #[serde(rename = "oldValue")]
        old_value: Option<serde_json::Value>,
    },
    /// A service fired one of its declared events.
    Event {
        service: UniqueId,
        key: String,
        args: serde_json::Value,
    },
}

impl HubEvent {
    /// The service this event is about.
    #[must_use]
    pub fn service(&self) -> &UniqueId {
        match self {
            Self::Register { service }
            | Self::Unregister { service }
            | Self::Identifier { service, .. }
            | Self::Update { service, .. }
            | Self::Event { service, .. } => service,
        }
    }

    /// Short action name, as used in sync frames and logs.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Unregister { .. } => "unregister",
            Self::Identifier { .. } => "identifier",
            Self::Update { .. } => "update",
            Self::Event { .. } => "event",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_tag_events_with_action_name() {
        let event = HubEvent::Update {
            service: UniqueId::new("virtual", "light"),
            key: "on".to_string(),
            value: json!(true),
            old_value: Some(json!(false)),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], json!("update"));
        assert_eq!(json["service"], json!("virtual:light"));
        assert_eq!(json["oldValue"], json!(false));
        assert_eq!(event.action(), "update");
    }

    #[test]
    fn should_expose_service_of_every_variant() {
        let id = UniqueId::new("p", "s");
        let event = HubEvent::Identifier {
            service: id.clone(),
            identifier: "mac:aa".parse().unwrap(),
        };
        assert_eq!(event.service(), &id);
    }
}
