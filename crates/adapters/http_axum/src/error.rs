//! HTTP error response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use hearth_domain::error::HearthError;

/// JSON envelope returned by every mutating endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(result: Option<T>) -> Self {
        Self {
            success: true,
            error: None,
            result,
        }
    }
}

/// Maps [`HearthError`] to an HTTP response with appropriate status code.
#[derive(Debug)]
pub struct ApiError(HearthError);

impl From<HearthError> for ApiError {
    fn from(err: HearthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            HearthError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            HearthError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string()),
            HearthError::NotImplemented(err) => (StatusCode::NOT_IMPLEMENTED, err.to_string()),
            HearthError::Backend(err) => {
                tracing::error!(error = %err, "backend error");
                (StatusCode::BAD_GATEWAY, err.to_string())
            }
        };

        let body: Envelope<()> = Envelope {
            success: false,
            error: Some(message),
            result: None,
        };
        (status, Json(body)).into_response()
    }
}
