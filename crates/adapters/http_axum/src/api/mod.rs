//! JSON REST API handler modules.

#[allow(clippy::missing_errors_doc)]
pub mod devices;
#[allow(clippy::missing_errors_doc)]
pub mod rules;
#[allow(clippy::missing_errors_doc)]
pub mod services;
pub mod sse;

use axum::Router;
use axum::routing::{get, post};

use hearth_domain::sync::SyncCursor;

use crate::state::AppState;

/// Header carrying the hub incarnation a snapshot was taken from.
pub const INSTANCE_HEADER: &str = "x-hearth-instance";
/// Header carrying the last broadcast counter a snapshot includes.
pub const COUNTER_HEADER: &str = "x-hearth-counter";

/// Response headers stamping a snapshot with its sync cursor.
pub(crate) fn cursor_headers(cursor: SyncCursor) -> [(&'static str, String); 2] {
    [
        (INSTANCE_HEADER, cursor.instance.to_string()),
        (COUNTER_HEADER, cursor.counter.to_string()),
    ]
}

/// Build the API router.
pub fn routes() -> Router<AppState> {
    Router::new()
        // Services
        .route("/services", get(services::list))
        .route("/service/{id}", post(services::write))
        .route("/service/{id}/action/{action_id}", post(services::action))
        // Devices
        .route("/devices", get(devices::list))
        // Rules
        .route("/rules", get(rules::list))
        .route("/rules/{id}", post(rules::set_enabled))
        // Sync stream
        .route("/events", get(sse::stream))
}
