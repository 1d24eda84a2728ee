//! Virtual power meter reading the light's draw.

use std::sync::Arc;
use std::time::Duration;

use hearth_app::provider::{Passive, Provider, Service};
use hearth_app::scheduler::{Backoff, Task, TaskMode};
use hearth_domain::schema::{PropertySchema, PropertyType};
use serde_json::json;

use super::BULB_IDENTIFIER;

pub const SERVICE_ID: &str = "meter";
pub const TASK_NAME: &str = "meter-sampling";

const STANDBY_WATTS: f64 = 0.4;
const FULL_WATTS: f64 = 9.0;

#[must_use]
pub fn create(provider: &Provider) -> Arc<Service> {
    let meter = provider.create_service(SERVICE_ID, "Virtual Power Meter", Arc::new(Passive));
    meter.register_type("sensor");
    meter.register_property(
        "power",
        PropertySchema::new(PropertyType::Number)
            .read_only()
            .tag("power")
            .unit("W"),
    );
    if let Ok(identifier) = BULB_IDENTIFIER.parse() {
        meter.register_identifier(identifier);
    }
    meter.update_value("power", json!(STANDBY_WATTS));
    meter
}

/// Draw of a bulb in the light's current state, rounded to 0.1 W.
#[must_use]
pub fn sample(light: &Service) -> f64 {
    let on = light.value("on").and_then(|v| v.as_bool()).unwrap_or(false);
    if !on {
        return STANDBY_WATTS;
    }
    let level = light
        .value("brightness")
        .and_then(|v| v.as_f64())
        .unwrap_or(100.0)
        .clamp(0.0, 100.0);
    let watts = STANDBY_WATTS + FULL_WATTS * level / 100.0;
    (watts * 10.0).round() / 10.0
}

/// Periodic task publishing [`sample`] on the meter.
pub fn sampling_task(light: Arc<Service>, meter: Arc<Service>, period: Duration, backoff: Backoff) -> Task {
    Task::spawn(TASK_NAME, TaskMode::Every(period), backoff, move || {
        let light = Arc::clone(&light);
        let meter = Arc::clone(&meter);
        async move {
            let watts = sample(&light);
            if meter.update_value("power", json!(watts)) {
                tracing::trace!(watts, "meter sampled");
            }
            Ok(())
        }
    })
}
