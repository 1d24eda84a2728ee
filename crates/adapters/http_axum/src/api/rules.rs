//! JSON REST handlers for rules.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use hearth_app::rules::RuleInfo;
use hearth_domain::error::{HearthError, ValidationError};
use hearth_domain::id::RuleId;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for enabling or disabling a rule.
#[derive(Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

/// Possible responses from the list endpoint.
pub enum ListResponse {
    Ok(Json<Vec<RuleInfo>>),
}

impl IntoResponse for ListResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the enable endpoint.
pub enum SetEnabledResponse {
    Ok(Json<RuleInfo>),
}

impl IntoResponse for SetEnabledResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// `GET /rules`
pub async fn list(State(state): State<AppState>) -> ListResponse {
    ListResponse::Ok(Json(state.hub.rules().list()))
}

/// `POST /rules/{id}`
pub async fn set_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SetEnabledRequest>,
) -> Result<SetEnabledResponse, ApiError> {
    let id: RuleId = id
        .parse()
        .map_err(|err| HearthError::from(ValidationError::InvalidRequest(format!("rule id: {err}"))))?;
    let info = state.hub.set_rule_enabled(id, req.enabled)?;
    Ok(SetEnabledResponse::Ok(Json(info)))
}
