//! Virtual services — light, switch, power meter.
//!
//! The light and the meter report the same identifier so the hub merges
//! them into one device, as it would a smart bulb exposed by two
//! integrations.

pub mod light;
pub mod meter;
pub mod switch;

use hearth_domain::error::{HearthError, ValidationError};
use serde_json::Value;

/// Identifier shared by the light and the meter.
pub const BULB_IDENTIFIER: &str = "mac:02:00:00:00:00:01";

fn expect_bool(key: &str, value: &Value) -> Result<bool, HearthError> {
    value.as_bool().ok_or_else(|| {
        ValidationError::InvalidRequest(format!("{key} expects a boolean, got {value}")).into()
    })
}

fn unknown_property(key: &str) -> HearthError {
    ValidationError::UnknownProperty(key.to_string()).into()
}
