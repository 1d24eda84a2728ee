//! Identifier newtypes.
//!
//! Handles and rule ids are random UUIDs. Service and device identities are
//! strings chosen by integrations, wrapped so they cannot be mixed up.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

macro_rules! define_id {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Access the inner UUID.
            #[must_use]
            pub fn as_uuid(self) -> uuid::Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id!(
    /// Owner handle of a constraint or a handler registration.
    HandleId
);

define_id!(
    /// Unique identifier of a loaded rule.
    RuleId
);

define_id!(
    /// Incarnation of the hub process, announced in every sync frame.
    InstanceId
);

/// Process-wide identity of a service: `provider:service`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UniqueId {
    provider: String,
    service: String,
}

impl UniqueId {
    #[must_use]
    pub fn new(provider: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            service: service.into(),
        }
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.service)
    }
}

impl FromStr for UniqueId {
    type Err = ValidationError;

    /// The provider part never contains `:`; the service part may.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((provider, service)) if !provider.is_empty() && !service.is_empty() => {
                Ok(Self::new(provider, service))
            }
            _ => Err(ValidationError::MalformedUniqueId(s.to_string())),
        }
    }
}

impl TryFrom<String> for UniqueId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UniqueId> for String {
    fn from(value: UniqueId) -> Self {
        value.to_string()
    }
}

/// Merge key of an inferred device (the first identifier it was created from).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_generate_unique_ids_when_called_twice() {
        let a = HandleId::new();
        let b = HandleId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn should_roundtrip_rule_id_through_display_and_from_str() {
        let id = RuleId::new();
        let parsed: RuleId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn should_format_unique_id_as_provider_colon_service() {
        let id = UniqueId::new("zigbee", "lamp");
        assert_eq!(id.to_string(), "zigbee:lamp");
    }

    #[test]
    fn should_keep_colons_in_service_part_when_parsing() {
        let id: UniqueId = "hue:light:3".parse().unwrap();
        assert_eq!(id.provider(), "hue");
        assert_eq!(id.service(), "light:3");
    }

    #[test]
    fn should_reject_unique_id_without_separator() {
        let result = UniqueId::from_str("lamp");
        assert_eq!(
            result,
            Err(ValidationError::MalformedUniqueId("lamp".to_string()))
        );
    }

    #[test]
    fn should_serialize_unique_id_as_plain_string() {
        let id = UniqueId::new("virtual", "light");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"virtual:light\"");
        let parsed: UniqueId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
