//! Condition — a guard evaluated against live service state.

use serde::{Deserialize, Serialize};

use crate::id::UniqueId;
use crate::identifier::Identifier;

/// A predicate a scripted rule checks on every run.
///
/// All conditions of a script must hold (logical AND). Reading the state a
/// condition refers to subscribes the rule to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// The property currently holds exactly `value`.
    Equals {
        service: UniqueId,
        key: String,
        value: serde_json::Value,
    },
    /// The property is a number strictly greater than `threshold`.
    Above {
        service: UniqueId,
        key: String,
        threshold: f64,
    },
    /// The property is a number strictly lower than `threshold`.
    Below {
        service: UniqueId,
        key: String,
        threshold: f64,
    },
    /// Some device currently owns the identifier.
    DevicePresent { identifier: Identifier },
}

impl Condition {
    /// The `(service, key)` pair a value condition reads.
    #[must_use]
    pub fn property(&self) -> Option<(&UniqueId, &str)> {
        match self {
            Self::Equals { service, key, .. }
            | Self::Above { service, key, .. }
            | Self::Below { service, key, .. } => Some((service, key)),
            Self::DevicePresent { .. } => None,
        }
    }

    /// Evaluate a value condition against the current value. Always `false`
    /// for conditions that do not read a property.
    #[must_use]
    pub fn test(&self, current: Option<&serde_json::Value>) -> bool {
        match (self, current) {
            (Self::Equals { value, .. }, Some(current)) => current == value,
            (Self::Above { threshold, .. }, Some(current)) => {
                current.as_f64().is_some_and(|v| v > *threshold)
            }
            (Self::Below { threshold, .. }, Some(current)) => {
                current.as_f64().is_some_and(|v| v < *threshold)
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equals {
                service,
                key,
                value,
            } => write!(f, "{service}.{key} == {value}"),
            Self::Above {
                service,
                key,
                threshold,
            } => write!(f, "{service}.{key} > {threshold}"),
            Self::Below {
                service,
                key,
                threshold,
            } => write!(f, "{service}.{key} < {threshold}"),
            Self::DevicePresent { identifier } => write!(f, "device({identifier})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn power_above(threshold: f64) -> Condition {
        Condition::Above {
            service: UniqueId::new("virtual", "meter"),
            key: "power".to_string(),
            threshold,
        }
    }

    #[test]
    fn should_compare_numbers_for_above_and_below() {
        assert!(power_above(100.0).test(Some(&json!(150))));
        assert!(!power_above(100.0).test(Some(&json!(100))));
        let below = Condition::Below {
            service: UniqueId::new("virtual", "meter"),
            key: "power".to_string(),
            threshold: 10.0,
        };
        assert!(below.test(Some(&json!(2.5))));
    }

    #[test]
    fn should_fail_when_value_is_missing_or_not_numeric() {
        assert!(!power_above(1.0).test(None));
        assert!(!power_above(1.0).test(Some(&json!("high"))));
    }

    #[test]
    fn should_compare_json_values_for_equals() {
        let c = Condition::Equals {
            service: UniqueId::new("virtual", "switch"),
            key: "on".to_string(),
            value: json!(true),
        };
        assert!(c.test(Some(&json!(true))));
        assert!(!c.test(Some(&json!(false))));
    }

    #[test]
    fn should_display_condition() {
        assert_eq!(power_above(5.0).to_string(), "virtual:meter.power > 5");
    }

    #[test]
    fn should_deserialize_tagged_condition() {
        let c: Condition = serde_json::from_value(json!({
            "type": "device_present",
            "identifier": "mac:aa"
        }))
        .unwrap();
        assert!(c.property().is_none());
    }
}
