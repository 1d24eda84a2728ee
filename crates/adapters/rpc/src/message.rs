//! Wire messages.
//!
//! A message is a JSON object on one line, either a call
//! `{"id"?, "method", "params"}` or a response `{"id", "result" | "error"}`.
//! A call without `id` is a notification and is never answered.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RpcError;

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call(Call),
    Response(Response),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub id: Option<u64>,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub outcome: Result<Value, RemoteError>,
}

/// Error payload of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

fn malformed(reason: impl Into<String>) -> RpcError {
    RpcError::Malformed(reason.into())
}

impl Message {
    /// Parse one line.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Malformed`] when the line is neither a call nor a
    /// response.
    pub fn decode(line: &str) -> Result<Self, RpcError> {
        let value: Value = serde_json::from_str(line).map_err(|err| malformed(err.to_string()))?;
        let Value::Object(mut map) = value else {
            return Err(malformed("message is not an object"));
        };

        if let Some(method) = map.remove("method") {
            let Value::String(method) = method else {
                return Err(malformed("method is not a string"));
            };
            let id = match map.remove("id") {
                None | Some(Value::Null) => None,
                Some(id) => Some(id.as_u64().ok_or_else(|| malformed("call id is not an unsigned integer"))?),
            };
            let params = map.remove("params").unwrap_or(Value::Null);
            return Ok(Self::Call(Call { id, method, params }));
        }

        let id = map
            .remove("id")
            .and_then(|id| id.as_u64())
            .ok_or_else(|| malformed("response without a valid id"))?;
        let outcome = match (map.remove("result"), map.remove("error")) {
            (Some(result), None) => Ok(result),
            (None, Some(error)) => {
                Err(serde_json::from_value::<RemoteError>(error).map_err(|err| malformed(format!("error payload: {err}")))?)
            }
            _ => return Err(malformed("response needs exactly one of result and error")),
        };
        Ok(Self::Response(Response { id, outcome }))
    }

    /// Serialize to one line, without the trailing newline.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut map = Map::new();
        match self {
            Self::Call(call) => {
                if let Some(id) = call.id {
                    map.insert("id".to_string(), id.into());
                }
                map.insert("method".to_string(), Value::String(call.method.clone()));
                map.insert("params".to_string(), call.params.clone());
            }
            Self::Response(response) => {
                map.insert("id".to_string(), response.id.into());
                match &response.outcome {
                    Ok(result) => {
                        map.insert("result".to_string(), result.clone());
                    }
                    Err(error) => {
                        map.insert(
                            "error".to_string(),
                            serde_json::json!({ "code": error.code, "message": error.message }),
                        );
                    }
                }
            }
        }
        Value::Object(map).to_string()
    }
}
