//! JSON REST handlers for devices.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};

use hearth_domain::device::Device;
use hearth_domain::sync::SyncCursor;

use crate::api::cursor_headers;
use crate::state::AppState;

/// Possible responses from the list endpoint.
pub enum ListResponse {
    Ok(SyncCursor, Json<BTreeMap<String, Device>>),
}

impl IntoResponse for ListResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(cursor, json) => (cursor_headers(cursor), json).into_response(),
        }
    }
}

/// `GET /devices`
///
/// Devices keyed by the identifier they were first created from.
pub async fn list(State(state): State<AppState>) -> ListResponse {
    let (cursor, devices) = state.hub.devices_snapshot();
    let devices = devices
        .into_iter()
        .map(|device| (device.key.as_str().to_string(), device))
        .collect();
    ListResponse::Ok(cursor, Json(devices))
}
