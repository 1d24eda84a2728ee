//! Identifiers — `kind:value` strings used to recognise the same physical
//! device across integrations (e.g. `mac:aabbccddeeff`, `serial:1234`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A single `kind:value` identifier reported by a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier {
    kind: String,
    value: String,
}

impl Identifier {
    /// Build an identifier from its two parts.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedIdentifier`] if either part is
    /// empty or the kind contains `:`.
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Result<Self, ValidationError> {
        let kind = kind.into();
        let value = value.into();
        if kind.is_empty() || value.is_empty() || kind.contains(':') {
            return Err(ValidationError::MalformedIdentifier(format!("{kind}:{value}")));
        }
        Ok(Self { kind, value })
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

impl FromStr for Identifier {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .split_once(':')
            .ok_or_else(|| ValidationError::MalformedIdentifier(s.to_string()))?;
        Self::new(kind, value)
    }
}

impl TryFrom<String> for Identifier {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.to_string()
    }
}
