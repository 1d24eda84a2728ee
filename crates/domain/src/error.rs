//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`HearthError`]
//! via `From`, so port boundaries only ever see this enum.

/// Top-level error shared by the domain, the application layer and the
/// port traits.
#[derive(Debug, thiserror::Error)]
pub enum HearthError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("not found")]
    NotFound(#[from] NotFoundError),

    #[error("not implemented")]
    NotImplemented(#[from] NotImplementedError),

    /// Failure reported by an integration, a transport or a store.
    #[error("backend error")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl HearthError {
    /// Wrap any error coming out of an integration or an adapter.
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Backend(err.into())
    }

    /// Stable numeric code used on the wire (RPC error responses).
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::NotImplemented(_) => 501,
            Self::Backend(_) => 500,
        }
    }

    /// Human readable message including the immediate source.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Validation(err) => err.to_string(),
            Self::NotFound(err) => err.to_string(),
            Self::NotImplemented(err) => err.to_string(),
            Self::Backend(err) => err.to_string(),
        }
    }
}

/// Invariant violations on incoming data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("identifier must have the form kind:value, got {0:?}")]
    MalformedIdentifier(String),

    #[error("unique id must have the form provider:service, got {0:?}")]
    MalformedUniqueId(String),

    #[error("name must not be empty")]
    EmptyName,

    #[error("property {0:?} is not declared")]
    UnknownProperty(String),

    #[error("property {0:?} is read-only")]
    ReadOnlyProperty(String),

    #[error("rule script must contain at least one action")]
    NoActions,

    #[error("re-run period must be between 1 and {max} seconds, got {got}")]
    InvalidPeriod { got: u64, max: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// A lookup by identity failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id:?} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// A service variant does not supply the requested operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} is not implemented by {service}")]
pub struct NotImplementedError {
    pub operation: &'static str,
    pub service: String,
}
