//! Service state — the data half of a controllable unit.
//!
//! [`ServiceState`] holds everything a service declares and its current
//! values. Every mutator reports whether something actually changed so the
//! caller (the entity model in `hearth-app`) can decide which events to emit.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;
use crate::id::UniqueId;
use crate::schema::{ActionSchema, EventSchema, PropertySchema};

/// A value change produced by [`ServiceState::update_value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChange {
    pub value: serde_json::Value,
    pub old_value: Option<serde_json::Value>,
}

/// Declarations and current values of one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceState {
    unique_id: UniqueId,
    pub name: String,
    pub priority: i32,
    types: BTreeSet<String>,
    identifiers: Vec<Identifier>,
    properties: BTreeMap<String, PropertySchema>,
    values: BTreeMap<String, serde_json::Value>,
    actions: BTreeMap<String, ActionSchema>,
    events: BTreeMap<String, EventSchema>,
}

impl ServiceState {
    #[must_use]
    pub fn new(unique_id: UniqueId, name: impl Into<String>) -> Self {
        Self {
            unique_id,
            name: name.into(),
            priority: 0,
            types: BTreeSet::new(),
            identifiers: Vec::new(),
            properties: BTreeMap::new(),
            values: BTreeMap::new(),
            actions: BTreeMap::new(),
            events: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn unique_id(&self) -> &UniqueId {
        &self.unique_id
    }

    /// Declare (or re-declare) a property.
    pub fn register_property(&mut self, key: impl Into<String>, schema: PropertySchema) {
        self.properties.insert(key.into(), schema);
    }

    pub fn register_action(&mut self, key: impl Into<String>, schema: ActionSchema) {
        self.actions.insert(key.into(), schema);
    }

    pub fn register_event(&mut self, key: impl Into<String>, schema: EventSchema) {
        self.events.insert(key.into(), schema);
    }

    /// Returns `true` when the type was not present yet.
    pub fn register_type(&mut self, kind: impl Into<String>) -> bool {
        self.types.insert(kind.into())
    }

    /// Append an identifier. Returns `true` when it was not present yet.
    ///
    /// Identifiers keep their registration order, which is the order the
    /// device resolver sees them in.
    pub fn register_identifier(&mut self, identifier: Identifier) -> bool {
        if self.identifiers.contains(&identifier) {
            return false;
        }
        self.identifiers.push(identifier);
        true
    }

    /// Replace every identifier. Returns the identifiers that are new
    /// compared to the previous set.
    pub fn update_identifiers(&mut self, identifiers: Vec<Identifier>) -> Vec<Identifier> {
        let previous = std::mem::take(&mut self.identifiers);
        let mut added = Vec::new();
        for identifier in identifiers {
            if self.register_identifier(identifier.clone()) && !previous.contains(&identifier) {
                added.push(identifier);
            }
        }
        added
    }

    pub fn update_types(&mut self, types: impl IntoIterator<Item = String>) {
        self.types.clear();
        self.types.extend(types);
    }

    /// Store `value` under `key`. Returns `None` when the stored value is
    /// already equal, so no-op writes never reach the event bus.
    pub fn update_value(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<ValueChange> {
        let key = key.into();
        if self.values.get(&key) == Some(&value) {
            return None;
        }
        let old_value = self.values.insert(key, value.clone());
        Some(ValueChange { value, old_value })
    }

    #[must_use]
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.values
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&PropertySchema> {
        self.properties.get(key)
    }

    #[must_use]
    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    #[must_use]
    pub fn has_type(&self, kind: &str) -> bool {
        self.types.contains(kind)
    }

    #[must_use]
    pub fn has_action(&self, key: &str) -> bool {
        self.actions.contains_key(key)
    }

    /// Serializable view of the whole state.
    #[must_use]
    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            name: self.name.clone(),
            priority: self.priority,
            identifiers: self.identifiers.iter().map(ToString::to_string).collect(),
            properties: self.properties.clone(),
            values: self.values.clone(),
            actions: self.actions.clone(),
            events: self.events.clone(),
            types: self.types.iter().cloned().collect(),
        }
    }
}

/// Wire representation of a service, as served by `GET /services` and
/// embedded in `register` sync frames.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSnapshot {
    pub name: String,
    pub priority: i32,
    pub identifiers: Vec<String>,
    pub properties: BTreeMap<String, PropertySchema>,
    pub values: BTreeMap<String, serde_json::Value>,
    pub actions: BTreeMap<String, ActionSchema>,
    pub events: BTreeMap<String, EventSchema>,
    pub types: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertyType;
    use serde_json::json;

    fn state() -> ServiceState {
        ServiceState::new(UniqueId::new("virtual", "light"), "Light")
    }

    fn ident(s: &str) -> Identifier {
        s.parse().unwrap()
    }

    #[test]
    fn should_report_change_when_value_differs() {
        let mut s = state();
        let change = s.update_value("on", json!(true)).unwrap();
        assert_eq!(change.value, json!(true));
        assert_eq!(change.old_value, None);

        let change = s.update_value("on", json!(false)).unwrap();
        assert_eq!(change.old_value, Some(json!(true)));
    }

    #[test]
    fn should_not_report_change_when_value_is_equal() {
        let mut s = state();
        s.update_value("level", json!({"a": [1, 2]}));
        assert!(s.update_value("level", json!({"a": [1, 2]})).is_none());
        assert!(s.update_value("level", json!({"a": [1, 2]})).is_none());
    }

    #[test]
    fn should_ignore_duplicate_identifier() {
        let mut s = state();
        assert!(s.register_identifier(ident("mac:aa")));
        assert!(!s.register_identifier(ident("mac:aa")));
        assert_eq!(s.identifiers().len(), 1);
    }

    #[test]
    fn should_replace_identifiers_and_return_only_new_ones() {
        let mut s = state();
        s.register_identifier(ident("mac:aa"));
        s.register_identifier(ident("serial:1"));

        let added = s.update_identifiers(vec![ident("serial:1"), ident("ip:10.0.0.2")]);

        assert_eq!(added, vec![ident("ip:10.0.0.2")]);
        assert_eq!(s.identifiers(), &[ident("serial:1"), ident("ip:10.0.0.2")]);
    }

    #[test]
    fn should_replace_types() {
        let mut s = state();
        s.register_type("light");
        s.update_types(vec!["switch".to_string()]);
        assert!(s.has_type("switch"));
        assert!(!s.has_type("light"));
    }

    #[test]
    fn should_treat_property_registration_as_idempotent() {
        let mut s = state();
        s.register_property("on", PropertySchema::new(PropertyType::Boolean));
        s.register_property("on", PropertySchema::new(PropertyType::Boolean));
        assert_eq!(s.snapshot().properties.len(), 1);
    }

    #[test]
    fn should_serialize_snapshot_with_string_identifiers() {
        let mut s = state();
        s.register_identifier(ident("mac:aa"));
        s.update_value("on", json!(false));
        let json = serde_json::to_value(s.snapshot()).unwrap();
        assert_eq!(json["identifiers"], json!(["mac:aa"]));
        assert_eq!(json["values"]["on"], json!(false));
        assert_eq!(json["name"], json!("Light"));
    }
}
