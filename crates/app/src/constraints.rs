//! Constraints — owner-keyed, prioritized overrides per `(service, property)`.
//!
//! This component only does the bookkeeping. Writing the arbitrated value
//! back to the device is the hub's job, driven by what these methods return.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hearth_domain::constraint::ConstraintSet;
use hearth_domain::id::{HandleId, UniqueId};
use serde_json::Value;

type PropertyKey = (UniqueId, String);

/// Every constraint set of the hub.
#[derive(Debug, Default)]
pub struct Constraints {
    sets: Mutex<HashMap<PropertyKey, ConstraintSet>>,
}

impl Constraints {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sets(&self) -> MutexGuard<'_, HashMap<PropertyKey, ConstraintSet>> {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or update `handle`'s constraint. Returns the value now in
    /// force.
    pub fn set(
        &self,
        service: &UniqueId,
        key: &str,
        handle: HandleId,
        priority: i32,
        value: Value,
    ) -> Option<Value> {
        let mut sets = self.sets();
        let set = sets
            .entry((service.clone(), key.to_string()))
            .or_default();
        set.set(handle, priority, value);
        set.resolve().cloned()
    }

    /// Remove `handle`'s constraint. Returns the value in force afterwards,
    /// `None` when nothing constrains the property any more or when `handle`
    /// held no constraint on it.
    pub fn unset(&self, service: &UniqueId, key: &str, handle: HandleId) -> Option<Value> {
        let mut sets = self.sets();
        let property = (service.clone(), key.to_string());
        let set = sets.get_mut(&property)?;
        if !set.unset(handle) {
            return None;
        }
        let resolved = set.resolve().cloned();
        if set.is_empty() {
            sets.remove(&property);
        }
        resolved
    }

    #[must_use]
    pub fn resolve(&self, service: &UniqueId, key: &str) -> Option<Value> {
        self.sets()
            .get(&(service.clone(), key.to_string()))
            .and_then(|set| set.resolve().cloned())
    }

    /// A device reported `value`. Returns the constrained value to write back
    /// when the two disagree.
    #[must_use]
    pub fn on_update(&self, service: &UniqueId, key: &str, value: &Value) -> Option<Value> {
        self.resolve(service, key).filter(|resolved| resolved != value)
    }

    /// Number of constraints on a property.
    #[must_use]
    pub fn count(&self, service: &UniqueId, key: &str) -> usize {
        self.sets()
            .get(&(service.clone(), key.to_string()))
            .map_or(0, ConstraintSet::len)
    }
}
