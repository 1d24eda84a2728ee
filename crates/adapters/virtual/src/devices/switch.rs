//! Virtual switch with a `toggle` action. Its last state survives restarts
//! through the key-value store.

use std::sync::Arc;

use async_trait::async_trait;
use hearth_app::ports::{KeyValueStore, Namespace};
use hearth_app::provider::{Provider, Service, ServiceBackend};
use hearth_domain::error::{HearthError, NotFoundError};
use hearth_domain::schema::{ActionSchema, PropertySchema, PropertyType};
use serde_json::{Value, json};

use super::{expect_bool, unknown_property};

pub const SERVICE_ID: &str = "switch";
const STATE_KEY: &str = "switch.on";

pub struct SwitchBackend<S> {
    store: Namespace<S>,
}

impl<S: KeyValueStore> SwitchBackend<S> {
    #[must_use]
    pub fn new(store: Namespace<S>) -> Self {
        Self { store }
    }

    /// Last persisted state, `false` when nothing is stored or the store
    /// fails.
    pub async fn restore(&self) -> bool {
        match self.store.get(STATE_KEY).await {
            Ok(value) => value.and_then(|v| v.as_bool()).unwrap_or(false),
            Err(err) => {
                tracing::warn!(error = %err.message(), "could not restore switch state");
                false
            }
        }
    }

    async fn persist(&self, on: bool) {
        if let Err(err) = self.store.set(STATE_KEY, Value::Bool(on)).await {
            tracing::warn!(error = %err.message(), "could not persist switch state");
        }
    }

    async fn apply(&self, service: &Service, on: bool) {
        if service.update_value("on", Value::Bool(on)) {
            self.persist(on).await;
        }
    }
}

#[async_trait]
impl<S: KeyValueStore + 'static> ServiceBackend for SwitchBackend<S> {
    async fn set_value(&self, service: &Service, key: &str, value: Value) -> Result<(), HearthError> {
        if key != "on" {
            return Err(unknown_property(key));
        }
        let on = expect_bool(key, &value)?;
        self.apply(service, on).await;
        Ok(())
    }

    async fn trigger_action(&self, service: &Service, action: &str, _args: Value) -> Result<Value, HearthError> {
        if action != "toggle" {
            return Err(NotFoundError {
                entity: "Action",
                id: format!("{}/{action}", service.unique_id()),
            }
            .into());
        }
        let on = !service.value("on").and_then(|v| v.as_bool()).unwrap_or(false);
        self.apply(service, on).await;
        Ok(json!({ "on": on }))
    }
}

/// Create the switch service in its last persisted state.
pub async fn create<S: KeyValueStore + 'static>(provider: &Provider, store: Namespace<S>) -> Arc<Service> {
    let backend = Arc::new(SwitchBackend::new(store));
    let on = backend.restore().await;

    let switch = provider.create_service(SERVICE_ID, "Virtual Switch", backend);
    switch.register_type("switch");
    switch.register_property("on", PropertySchema::new(PropertyType::Boolean).tag("on"));
    switch.register_action(
        "toggle",
        ActionSchema {
            description: Some("Flip the switch".to_string()),
            params: Value::Null,
        },
    );
    switch.update_value("on", Value::Bool(on));
    switch
}
