//! # hearth-adapter-virtual
//!
//! Demo provider with simulated services, useful to try the hub without
//! hardware.
//!
//! ## Provided services
//!
//! | Service | Unique ID | Behaviour |
//! |---------|-----------|-----------|
//! | Virtual Light | `virtual:light` | Writable `on` and `brightness` |
//! | Virtual Switch | `virtual:switch` | Writable `on`, `toggle` action, state persisted |
//! | Virtual Power Meter | `virtual:meter` | Read-only `power` (W) following the light |
//!
//! The light and the meter share an identifier and merge into one device.
//!
//! ## Dependency rule
//!
//! Depends on `hearth-app` (entity model and ports) and `hearth-domain` only.

pub mod devices;

use std::sync::Arc;
use std::time::Duration;

use hearth_app::ports::{KeyValueStore, Namespace};
use hearth_app::provider::Provider;
use hearth_app::scheduler::Backoff;
use hearth_domain::error::HearthError;

/// Provider id, and the key-value namespace the switch persists into.
pub const PROVIDER_ID: &str = "virtual";

#[derive(Debug, Clone)]
pub struct VirtualOptions {
    /// How often the meter samples the light.
    pub meter_period: Duration,
    pub backoff: Backoff,
}

impl Default for VirtualOptions {
    fn default() -> Self {
        Self {
            meter_period: Duration::from_secs(5),
            backoff: Backoff::default(),
        }
    }
}

/// Build the virtual provider with its three services registered and the
/// meter sampling task running.
///
/// # Errors
///
/// Returns a validation error if a service cannot be registered.
pub async fn setup<S: KeyValueStore + 'static>(
    store: Arc<S>,
    options: VirtualOptions,
) -> Result<Arc<Provider>, HearthError> {
    let provider = Arc::new(Provider::new(PROVIDER_ID)?);

    let light = devices::light::create(&provider);
    let switch = devices::switch::create(&provider, Namespace::new(store, PROVIDER_ID)).await;
    let meter = devices::meter::create(&provider);

    provider.register_service(Arc::clone(&light))?;
    provider.register_service(switch)?;
    provider.register_service(Arc::clone(&meter))?;
    provider.add_task(devices::meter::sampling_task(
        light,
        meter,
        options.meter_period,
        options.backoff,
    ));

    tracing::info!(provider = PROVIDER_ID, services = provider.services().len(), "virtual provider ready");
    Ok(provider)
}
