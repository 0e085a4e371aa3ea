//! Shared error types for frame decoding and RPC failures.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure to decode or interpret a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("missing {0} field in the received message")]
    MissingField(&'static str),
    #[error("invalid {0} field in the received message")]
    InvalidField(&'static str),
    #[error("unknown frame type {0}")]
    UnknownFrameType(u64),
    #[error("unknown response type {0}")]
    UnknownResponseType(u8),
    #[error("unknown object kind {0:?}")]
    UnknownKind(String),
    #[error("object is missing its primary key {0:?}")]
    MissingPk(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Json(err.to_string())
    }
}

/// The `error` payload of an error-typed response, exactly as the server
/// sent it. Handlers send either a plain message or a map of field errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RpcErrorPayload(pub Value);

impl RpcErrorPayload {
    /// Field-level validation errors, when the server sent a map.
    pub fn field_errors(&self) -> Option<&serde_json::Map<String, Value>> {
        self.0.as_object()
    }
}

impl fmt::Display for RpcErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(message) => f.write_str(message),
            Value::Null => f.write_str("unknown error"),
            other => write!(f, "{}", other),
        }
    }
}

impl std::error::Error for RpcErrorPayload {}
