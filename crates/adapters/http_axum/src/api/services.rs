//! JSON REST handlers for services.

use std::collections::BTreeMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use hearth_domain::error::{HearthError, ValidationError};
use hearth_domain::id::UniqueId;
use hearth_domain::service::ServiceSnapshot;
use hearth_domain::sync::SyncCursor;

use crate::api::cursor_headers;
use crate::error::{ApiError, Envelope};
use crate::state::AppState;

/// Possible responses from the list endpoint.
pub enum ListResponse {
    Ok(SyncCursor, Json<BTreeMap<UniqueId, ServiceSnapshot>>),
}

impl IntoResponse for ListResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(cursor, json) => (cursor_headers(cursor), json).into_response(),
        }
    }
}

/// Possible responses from the write endpoint.
pub enum WriteResponse {
    Ok(Json<Envelope<()>>),
}

impl IntoResponse for WriteResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the action endpoint.
pub enum ActionResponse {
    Ok(Json<Envelope<Value>>),
}

impl IntoResponse for ActionResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

fn parse_id(id: &str) -> Result<UniqueId, ApiError> {
    id.parse::<UniqueId>()
        .map_err(|err| ApiError::from(HearthError::from(err)))
}

/// `GET /services`
pub async fn list(State(state): State<AppState>) -> ListResponse {
    let (cursor, services) = state.hub.services_snapshot();
    ListResponse::Ok(cursor, Json(services))
}

/// `POST /service/{id}`
///
/// Writes each property of the body in key order. Stops at the first
/// failure; earlier writes stay applied.
pub async fn write(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<WriteResponse, ApiError> {
    let id = parse_id(&id)?;
    let values: BTreeMap<String, Value> = serde_json::from_slice(&body).map_err(|err| {
        HearthError::from(ValidationError::InvalidRequest(format!("property values: {err}")))
    })?;
    for (key, value) in values {
        if let Err(err) = state.hub.write_property(&id, &key, value).await {
            tracing::warn!(service = %id, key, error = %err.message(), "write rejected");
            return Err(err.into());
        }
    }
    Ok(WriteResponse::Ok(Json(Envelope::ok(None))))
}

/// `POST /service/{id}/action/{action_id}`
///
/// An empty body invokes the action with `null` arguments.
pub async fn action(
    State(state): State<AppState>,
    Path((id, action_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<ActionResponse, ApiError> {
    let id = parse_id(&id)?;
    let args = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|err| {
            HearthError::from(ValidationError::InvalidRequest(format!("action arguments: {err}")))
        })?
    };
    let result = state.hub.trigger_action(&id, &action_id, args).await?;
    Ok(ActionResponse::Ok(Json(Envelope::ok(Some(result)))))
}
