//! Request/response envelopes and lenient frame decoding.
//!
//! # Wire Format
//!
//! Client to server:
//!
//! ```text
//! {"requestId":"<id>","method":"<dot.separated.path>","args":[...] | null}
//! ```
//!
//! Server to client:
//!
//! ```text
//! {"requestId":"<id>","type":"reply"|"item"|"end"|"error","object":<any>}
//! ```
//!
//! Inbound decoding never fails loudly: anything that is not a well-formed
//! response envelope is dropped, since unrelated traffic on the shared
//! connection is expected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// Outbound call envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Decimal id, unique per connection.
    pub request_id: String,
    /// Dot-separated path below the proxy root.
    pub method: String,
    /// Positional arguments; `null` when the call passed none.
    pub args: Option<Vec<Value>>,
}

impl Request {
    pub fn new(
        request_id: impl Into<String>,
        method: impl Into<String>,
        args: Option<Vec<Value>>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            method: method.into(),
            args,
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Response classification.
///
/// Anything other than the four known tags, including non-string tags,
/// is kept as `Unknown` with its raw text so the router can reject it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value", into = "String")]
pub enum ResponseKind {
    Reply,
    Item,
    End,
    Error,
    Unknown(String),
}

impl ResponseKind {
    pub fn as_str(&self) -> &str {
        match self {
            ResponseKind::Reply => "reply",
            ResponseKind::Item => "item",
            ResponseKind::End => "end",
            ResponseKind::Error => "error",
            ResponseKind::Unknown(raw) => raw,
        }
    }

    /// Every kind except `item` ends the call.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResponseKind::Item)
    }
}

impl From<Value> for ResponseKind {
    fn from(value: Value) -> Self {
        match value {
            Value::String(tag) => match tag.as_str() {
                "reply" => ResponseKind::Reply,
                "item" => ResponseKind::Item,
                "end" => ResponseKind::End,
                "error" => ResponseKind::Error,
                _ => ResponseKind::Unknown(tag),
            },
            other => ResponseKind::Unknown(other.to_string()),
        }
    }
}

impl From<ResponseKind> for String {
    fn from(kind: ResponseKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Inbound response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Id of the request this frame answers.
    pub request_id: String,
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    /// Payload: a value for `item`/`reply`, the failure for `error`.
    #[serde(default)]
    pub object: Value,
}

impl Response {
    pub fn new(request_id: impl Into<String>, kind: ResponseKind, object: Value) -> Self {
        Self {
            request_id: request_id.into(),
            kind,
            object,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Decode one inbound text frame.
///
/// Returns `None` for frames that are not JSON, not an object, or lack
/// `requestId`/`type`. A non-string `requestId` can never match a call, so
/// those frames are dropped as well.
pub fn decode_frame(text: &str) -> Option<Response> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            trace!("Dropping non-JSON frame: {}", e);
            return None;
        }
    };

    let is_envelope = value
        .as_object()
        .map(|obj| obj.contains_key("requestId") && obj.contains_key("type"))
        .unwrap_or(false);
    if !is_envelope {
        trace!("Dropping frame without requestId/type");
        return None;
    }

    match serde_json::from_value(value) {
        Ok(response) => Some(response),
        Err(e) => {
            trace!("Dropping malformed response envelope: {}", e);
            None
        }
    }
}

/// Extract the failure text carried by an `error` response.
///
/// Structured objects contribute their `message` field; strings are used
/// as-is; `null` becomes `"(none)"`; anything else is rendered as JSON.
pub fn error_message(object: &Value) -> String {
    match object {
        Value::Null => "(none)".to_string(),
        Value::String(text) => text.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(message)) => message.clone(),
            Some(other) => other.to_string(),
            None => object.to_string(),
        },
        other => other.to_string(),
    }
}
