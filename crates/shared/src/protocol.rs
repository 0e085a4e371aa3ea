//! JSON frame definitions for the multiplexed websocket protocol.
//!
//! Every frame is a JSON object with an integer `type` discriminator:
//!
//! - `0` request: `{type, request_id, method, params}`
//! - `1` response: `{type, request_id, rtype, result | error}`
//! - `2` notify: `{type, name, action, data}`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, RpcErrorPayload};
use crate::models::{Action, ObjectKind};

/// Frame discriminator carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    Request = 0,
    Response = 1,
    Notify = 2,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            2 => Ok(MessageType::Notify),
            other => Err(ProtocolError::UnknownFrameType(other as u64)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

/// Outcome carried in a response's `rtype` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ResponseType {
    Success = 0,
    Error = 1,
}

impl TryFrom<u8> for ResponseType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(ResponseType::Success),
            1 => Ok(ResponseType::Error),
            other => Err(ProtocolError::UnknownResponseType(other)),
        }
    }
}

impl From<ResponseType> for u8 {
    fn from(value: ResponseType) -> Self {
        value as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: u64,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u64,
    pub rtype: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Response {
    pub fn success(request_id: u64, result: Value) -> Self {
        Self {
            request_id,
            rtype: ResponseType::Success,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(request_id: u64, error: Value) -> Self {
        Self {
            request_id,
            rtype: ResponseType::Error,
            result: None,
            error: Some(error),
        }
    }

    /// Collapse the response into the caller-facing result. A successful
    /// response without a `result` field resolves to `null`.
    pub fn into_result(self) -> Result<Value, RpcErrorPayload> {
        match self.rtype {
            ResponseType::Success => Ok(self.result.unwrap_or(Value::Null)),
            ResponseType::Error => Err(RpcErrorPayload(self.error.unwrap_or(Value::Null))),
        }
    }
}

/// A server push announcing a change to one object.
///
/// `name` stays a plain string so that pushes for kinds this client does not
/// know about can be parsed and ignored instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notify {
    pub name: String,
    pub action: Action,
    #[serde(default)]
    pub data: Value,
}

impl Notify {
    pub fn new(kind: ObjectKind, action: Action, data: Value) -> Self {
        Self {
            name: kind.as_str().to_string(),
            action,
            data,
        }
    }

    pub fn kind(&self) -> Result<ObjectKind, ProtocolError> {
        self.name.parse()
    }
}

/// One decoded websocket frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(Request),
    Response(Response),
    Notify(Notify),
}

impl Frame {
    pub fn message_type(&self) -> MessageType {
        match self {
            Frame::Request(_) => MessageType::Request,
            Frame::Response(_) => MessageType::Response,
            Frame::Notify(_) => MessageType::Notify,
        }
    }

    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Frame, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        Frame::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Frame, ProtocolError> {
        let raw_type = value
            .get("type")
            .ok_or(ProtocolError::MissingField("type"))?
            .as_u64()
            .ok_or(ProtocolError::InvalidField("type"))?;
        let message_type = u8::try_from(raw_type)
            .map_err(|_| ProtocolError::UnknownFrameType(raw_type))
            .and_then(MessageType::try_from)?;

        let frame = match message_type {
            MessageType::Request => Frame::Request(serde_json::from_value(value)?),
            MessageType::Response => Frame::Response(serde_json::from_value(value)?),
            MessageType::Notify => Frame::Notify(serde_json::from_value(value)?),
        };
        Ok(frame)
    }

    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        let mut value = match self {
            Frame::Request(request) => serde_json::to_value(request)?,
            Frame::Response(response) => serde_json::to_value(response)?,
            Frame::Notify(notify) => serde_json::to_value(notify)?,
        };
        if let Value::Object(map) = &mut value {
            map.insert(
                "type".to_string(),
                Value::from(u8::from(self.message_type())),
            );
        }
        Ok(value)
    }

    /// Encode as the JSON text sent over the socket.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&self.to_value()?)?)
    }
}
