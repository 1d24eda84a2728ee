//! In-memory [`KeyValueStore`], used when no database is configured and in
//! tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hearth_domain::error::HearthError;
use serde_json::Value;

use crate::ports::KeyValueStore;

/// Volatile key-value store.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    namespaces: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl InMemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn namespaces(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, Value>>> {
        self.namespaces.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, HearthError> {
        Ok(self
            .namespaces()
            .get(namespace)
            .and_then(|entries| entries.get(key).cloned()))
    }

    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<(), HearthError> {
        self.namespaces()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn has(&self, namespace: &str, key: &str) -> Result<bool, HearthError> {
        Ok(self
            .namespaces()
            .get(namespace)
            .is_some_and(|entries| entries.contains_key(key)))
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, HearthError> {
        Ok(self
            .namespaces()
            .get_mut(namespace)
            .and_then(|entries| entries.remove(key))
            .is_some())
    }

    async fn clear(&self, namespace: &str) -> Result<(), HearthError> {
        self.namespaces().remove(namespace);
        Ok(())
    }
}
