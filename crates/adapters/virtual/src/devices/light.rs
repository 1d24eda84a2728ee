//! Virtual light with `on` and `brightness`.

use std::sync::Arc;

use async_trait::async_trait;
use hearth_app::provider::{Provider, Service, ServiceBackend};
use hearth_domain::error::{HearthError, ValidationError};
use hearth_domain::schema::{PropertySchema, PropertyType};
use serde_json::{Value, json};

use super::{BULB_IDENTIFIER, expect_bool, unknown_property};

pub const SERVICE_ID: &str = "light";

/// Applies writes instantly, as if the bulb acknowledged them.
#[derive(Debug, Default)]
pub struct LightBackend;

#[async_trait]
impl ServiceBackend for LightBackend {
    async fn set_value(&self, service: &Service, key: &str, value: Value) -> Result<(), HearthError> {
        match key {
            "on" => {
                let on = expect_bool(key, &value)?;
                service.update_value("on", Value::Bool(on));
            }
            "brightness" => {
                let level = value.as_u64().ok_or_else(|| {
                    ValidationError::InvalidRequest(format!("brightness expects 0..=100, got {value}"))
                })?;
                service.update_value("brightness", json!(level.min(100)));
            }
            _ => return Err(unknown_property(key)),
        }
        Ok(())
    }
}

/// Create the light service, off at full brightness.
#[must_use]
pub fn create(provider: &Provider) -> Arc<Service> {
    let light = provider.create_service(SERVICE_ID, "Virtual Light", Arc::new(LightBackend));
    light.register_type("light");
    light.register_property("on", PropertySchema::new(PropertyType::Boolean).tag("on"));
    light.register_property(
        "brightness",
        PropertySchema::new(PropertyType::Integer)
            .tag("brightness")
            .unit("%")
            .bounds(0.0, 100.0),
    );
    if let Ok(identifier) = BULB_IDENTIFIER.parse() {
        light.register_identifier(identifier);
    }
    light.update_value("on", Value::Bool(false));
    light.update_value("brightness", json!(100));
    light
}
