//! Key-value storage port — small persistent state for integrations.
//!
//! Values are JSON documents grouped in named namespaces, typically one per
//! provider.

use std::future::Future;
use std::sync::Arc;

use hearth_domain::error::HearthError;
use serde_json::Value;

/// Namespaced JSON key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// # Errors
    ///
    /// Returns a storage error if the underlying store fails.
    fn get(
        &self,
        namespace: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<Value>, HearthError>> + Send;

    /// Insert or replace.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the underlying store fails.
    fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
    ) -> impl Future<Output = Result<(), HearthError>> + Send;

    /// # Errors
    ///
    /// Returns a storage error if the underlying store fails.
    fn has(&self, namespace: &str, key: &str)
    -> impl Future<Output = Result<bool, HearthError>> + Send;

    /// Returns `true` when the key existed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the underlying store fails.
    fn delete(
        &self,
        namespace: &str,
        key: &str,
    ) -> impl Future<Output = Result<bool, HearthError>> + Send;

    /// Remove every key of a namespace.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the underlying store fails.
    fn clear(&self, namespace: &str) -> impl Future<Output = Result<(), HearthError>> + Send;
}

/// A store bound to one namespace.
#[derive(Debug)]
pub struct Namespace<S> {
    store: Arc<S>,
    name: String,
}

impl<S> Clone for Namespace<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name.clone(),
        }
    }
}

impl<S: KeyValueStore> Namespace<S> {
    pub fn new(store: Arc<S>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// # Errors
    ///
    /// Returns a storage error if the underlying store fails.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, HearthError> {
        self.store.get(&self.name, key).await
    }

    /// # Errors
    ///
    /// Returns a storage error if the underlying store fails.
    pub async fn set(&self, key: &str, value: Value) -> Result<(), HearthError> {
        self.store.set(&self.name, key, value).await
    }

    /// # Errors
    ///
    /// Returns a storage error if the underlying store fails.
    pub async fn has(&self, key: &str) -> Result<bool, HearthError> {
        self.store.has(&self.name, key).await
    }

    /// # Errors
    ///
    /// Returns a storage error if the underlying store fails.
    pub async fn delete(&self, key: &str) -> Result<bool, HearthError> {
        self.store.delete(&self.name, key).await
    }

    /// # Errors
    ///
    /// Returns a storage error if the underlying store fails.
    pub async fn clear(&self) -> Result<(), HearthError> {
        self.store.clear(&self.name).await
    }
}
