//! Action — the effect a scripted rule applies.

use serde::{Deserialize, Serialize};

use crate::id::UniqueId;

/// An effect applied while a script's conditions hold (or do not hold, for
/// the `otherwise` branch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Hold a property at `value` for as long as the branch keeps being
    /// chosen. Released automatically on the first run that does not
    /// re-claim it.
    Constrain {
        service: UniqueId,
        key: String,
        value: serde_json::Value,
        #[serde(default)]
        priority: i32,
    },
    /// One-off write through the handler chain.
    Set {
        service: UniqueId,
        key: String,
        value: serde_json::Value,
    },
    /// Invoke an action on a service.
    Trigger {
        service: UniqueId,
        action: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constrain {
                service,
                key,
                value,
                priority,
            } => write!(f, "constrain({service}.{key} = {value} @ {priority})"),
            Self::Set {
                service,
                key,
                value,
            } => write!(f, "set({service}.{key} = {value})"),
            Self::Trigger {
                service, action, ..
            } => write!(f, "trigger({service}.{action})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_default_priority_to_zero() {
        let a: Action = serde_json::from_value(json!({
            "type": "constrain",
            "service": "virtual:light",
            "key": "on",
            "value": false
        }))
        .unwrap();
        assert!(matches!(a, Action::Constrain { priority: 0, .. }));
    }

    #[test]
    fn should_display_trigger_action() {
        let a = Action::Trigger {
            service: UniqueId::new("virtual", "switch"),
            action: "toggle".to_string(),
            args: serde_json::Value::Null,
        };
        assert_eq!(a.to_string(), "trigger(virtual:switch.toggle)");
    }
}
