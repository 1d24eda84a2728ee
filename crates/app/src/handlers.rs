//! Handlers — ordered interception of writes to one `(service, property)`.
//!
//! A write walks the chain in registration order. The first handler that returns
//! `Ok(true)` consumes it. If none does, the write reaches the service's own
//! [`set_value`](crate::provider::Service::set_value).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use hearth_domain::error::HearthError;
use hearth_domain::id::{HandleId, UniqueId};
use serde_json::Value;

use crate::provider::Service;

type PropertyKey = (UniqueId, String);

/// Interceptor for writes.
#[async_trait]
pub trait WriteHandler: Send + Sync {
    /// Returns `Ok(true)` to consume the write. An error is logged and
    /// treated as `Ok(false)`.
    async fn handle(&self, service: &Service, key: &str, value: &Value) -> Result<bool, HearthError>;
}

/// Adapter turning a synchronous closure into a [`WriteHandler`].
struct FnHandler<F>(F);

/// Wrap a synchronous closure as a shareable [`WriteHandler`].
pub fn handler_fn<F>(f: F) -> Arc<dyn WriteHandler>
where
    F: Fn(&Service, &str, &Value) -> Result<bool, HearthError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

#[async_trait]
impl<F> WriteHandler for FnHandler<F>
where
    F: Fn(&Service, &str, &Value) -> Result<bool, HearthError> + Send + Sync,
{
    async fn handle(&self, service: &Service, key: &str, value: &Value) -> Result<bool, HearthError> {
        (self.0)(service, key, value)
    }
}

/// Per-property handler chains.
#[derive(Default)]
pub struct Handlers {
    chains: Mutex<HashMap<PropertyKey, Vec<(HandleId, Arc<dyn WriteHandler>)>>>,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("properties", &self.chains().len())
            .finish()
    }
}

impl Handlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn chains(&self) -> MutexGuard<'_, HashMap<PropertyKey, Vec<(HandleId, Arc<dyn WriteHandler>)>>> {
        self.chains.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a handler to the chain.
    pub fn add(&self, service: &UniqueId, key: &str, handle: HandleId, handler: Arc<dyn WriteHandler>) {
        self.chains()
            .entry((service.clone(), key.to_string()))
            .or_default()
            .push((handle, handler));
    }

    /// Returns `true` when `handle` had a handler on that property.
    pub fn remove(&self, service: &UniqueId, key: &str, handle: HandleId) -> bool {
        let mut chains = self.chains();
        let property = (service.clone(), key.to_string());
        let Some(chain) = chains.get_mut(&property) else {
            return false;
        };
        let before = chain.len();
        chain.retain(|(owner, _)| *owner != handle);
        let removed = chain.len() != before;
        if chain.is_empty() {
            chains.remove(&property);
        }
        removed
    }

    #[must_use]
    pub fn len(&self, service: &UniqueId, key: &str) -> usize {
        self.chains()
            .get(&(service.clone(), key.to_string()))
            .map_or(0, Vec::len)
    }

    /// Run the chain, then fall back to the service's native write.
    ///
    /// # Errors
    ///
    /// Propagates the native write's error when no handler consumed it.
    pub async fn dispatch(&self, service: &Service, key: &str, value: Value) -> Result<(), HearthError> {
        if self.intercept(service, key, &value).await {
            return Ok(());
        }
        service.set_value(key, value).await
    }

    /// Run the chain only. Returns `true` when a handler consumed the write.
    pub async fn intercept(&self, service: &Service, key: &str, value: &Value) -> bool {
        let chain: Vec<_> = self
            .chains()
            .get(&(service.unique_id().clone(), key.to_string()))
            .cloned()
            .unwrap_or_default();

        for (handle, handler) in chain {
            match handler.handle(service, key, value).await {
                Ok(true) => {
                    tracing::debug!(service = %service.unique_id(), key, %handle, "write consumed by handler");
                    return true;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(
                        service = %service.unique_id(),
                        key,
                        %handle,
                        error = %err,
                        "write handler failed, skipping"
                    );
                }
            }
        }
        false
    }
}
