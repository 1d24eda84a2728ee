//! Rule scripts — rule bodies expressed as data.
//!
//! A [`RuleScript`] is the sandboxed form of a rule: it can only read and
//! write through the rule context, never touch the host. On every run the
//! conditions are evaluated; `then` applies when they all hold, `otherwise`
//! when they do not.

mod action;
mod condition;

pub use action::Action;
pub use condition::Condition;

use serde::{Deserialize, Serialize};

use crate::error::{HearthError, ValidationError};

/// A declarative rule body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleScript {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub when: Vec<Condition>,
    #[serde(default)]
    pub then: Vec<Action>,
    #[serde(default)]
    pub otherwise: Vec<Action>,
    /// Re-run period, for scripts that must be re-evaluated even when
    /// nothing they read changes.
    #[serde(default)]
    pub every_secs: Option<u64>,
}

fn enabled_by_default() -> bool {
    true
}

/// Longest accepted re-run period (one year).
pub const MAX_PERIOD_SECS: u64 = 365 * 24 * 60 * 60;

impl RuleScript {
    /// Check invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - both branches are empty ([`ValidationError::NoActions`])
    /// - `every_secs` is zero or above [`MAX_PERIOD_SECS`]
    ///   ([`ValidationError::InvalidPeriod`])
    pub fn validate(&self) -> Result<(), HearthError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.then.is_empty() && self.otherwise.is_empty() {
            return Err(ValidationError::NoActions.into());
        }
        if let Some(got) = self.every_secs {
            if got == 0 || got > MAX_PERIOD_SECS {
                return Err(ValidationError::InvalidPeriod {
                    got,
                    max: MAX_PERIOD_SECS,
                }
                .into());
            }
        }
        Ok(())
    }
}
