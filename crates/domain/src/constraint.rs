//! Constraints — prioritized, owner-keyed overrides of a property value.
//!
//! A [`ConstraintSet`] holds every constraint attached to one
//! `(service, property)` pair, sorted ascending by priority. The effective
//! value is the last entry: the highest priority, and among equal priorities
//! the one inserted most recently.

use crate::id::HandleId;

/// One override.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub priority: i32,
    pub handle: HandleId,
    pub value: serde_json::Value,
}

/// Sorted constraints of a single property.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintSet {
    entries: Vec<Constraint>,
}

impl ConstraintSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update the constraint owned by `handle`.
    ///
    /// An existing entry keeps its position when its priority is unchanged
    /// (only the value is replaced); otherwise it is moved to the slot its
    /// new priority calls for.
    pub fn set(&mut self, handle: HandleId, priority: i32, value: serde_json::Value) {
        if let Some(existing) = self.entries.iter_mut().find(|c| c.handle == handle) {
            if existing.priority == priority {
                existing.value = value;
                return;
            }
        }
        self.entries.retain(|c| c.handle != handle);
        let at = self.entries.partition_point(|c| c.priority <= priority);
        self.entries.insert(
            at,
            Constraint {
                priority,
                handle,
                value,
            },
        );
    }

    /// Remove the constraint owned by `handle`. Returns `true` if one existed.
    pub fn unset(&mut self, handle: HandleId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|c| c.handle != handle);
        before != self.entries.len()
    }

    /// The arbitrated value, `None` when unconstrained.
    #[must_use]
    pub fn resolve(&self) -> Option<&serde_json::Value> {
        self.entries.last().map(|c| &c.value)
    }

    #[must_use]
    pub fn contains(&self, handle: HandleId) -> bool {
        self.entries.iter().any(|c| c.handle == handle)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.entries.iter()
    }
}
