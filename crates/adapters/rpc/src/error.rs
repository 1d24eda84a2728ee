//! Transport errors.

use std::time::Duration;

use hearth_domain::error::{HearthError, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The channel closed before the call completed.
    #[error("channel closed")]
    Closed,

    #[error("call to {method:?} timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    /// The remote side answered with an error.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("transport error")]
    Io(#[from] std::io::Error),
}

impl From<RpcError> for HearthError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote { code: 400, message } => ValidationError::InvalidRequest(message).into(),
            other => Self::backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_keep_remote_validation_errors_as_validation() {
        let err = HearthError::from(RpcError::Remote {
            code: 400,
            message: "bad brightness".to_string(),
        });
        assert_eq!(err.code(), 400);
        assert_eq!(err.message(), "invalid request: bad brightness");
    }

    #[test]
    fn should_report_other_failures_as_backend_errors() {
        assert_eq!(HearthError::from(RpcError::Closed).code(), 500);
    }
}
