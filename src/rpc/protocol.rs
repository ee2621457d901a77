//! Wire protocol types
//!
//! Newline-delimited JSON-RPC 2.0: each frame is one UTF-8 JSON object
//! followed by a newline. Three message kinds exist on the wire: requests
//! (id + method), responses (id + result|error), and notifications (method,
//! no id).

use crate::error::AssistError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Reserved protocol-level error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;

/// An inbound or outbound request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A response carrying exactly one of `result` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method {} not found", method))
    }
}

impl From<&AssistError> for RpcError {
    fn from(err: &AssistError) -> Self {
        Self {
            code: err.kind.code(),
            message: err.message.clone(),
            data: Some(err.to_data()),
        }
    }
}

/// A notification: fire-and-forget, no id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Any inbound frame after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    /// Classify one wire frame.
    ///
    /// A frame with `id` and `method` is a request; `id` without `method` is
    /// a response; `method` without `id` is a notification. Anything else is
    /// invalid.
    pub fn parse(line: &str) -> Result<Message, RpcError> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| RpcError::new(PARSE_ERROR, format!("invalid JSON frame: {}", e)))?;
        let has_id = value.get("id").map(|id| !id.is_null()).unwrap_or(false);
        let has_method = value.get("method").is_some();

        match (has_id, has_method) {
            (true, true) => serde_json::from_value(value)
                .map(Message::Request)
                .map_err(|e| RpcError::new(INVALID_REQUEST, format!("malformed request: {}", e))),
            (true, false) => serde_json::from_value(value)
                .map(Message::Response)
                .map_err(|e| RpcError::new(INVALID_REQUEST, format!("malformed response: {}", e))),
            (false, true) => serde_json::from_value(value)
                .map(Message::Notification)
                .map_err(|e| {
                    RpcError::new(INVALID_REQUEST, format!("malformed notification: {}", e))
                }),
            (false, false) => Err(RpcError::new(
                INVALID_REQUEST,
                "frame has neither id nor method",
            )),
        }
    }
}

/// Render any outbound message as one newline-terminated frame.
pub fn to_frame<T: Serialize>(message: &T) -> String {
    let mut frame = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    frame.push('\n');
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_request() {
        let msg = Message::parse(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        match msg {
            Message::Request(req) => {
                assert_eq!(req.method, "tools/list");
                assert_eq!(req.id, json!(1));
                assert!(req.params.is_null());
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn classifies_response() {
        let msg =
            Message::parse(r#"{"jsonrpc":"2.0","id":7,"result":{"content":"ok"}}"#).unwrap();
        assert!(matches!(msg, Message::Response(_)));
    }

    #[test]
    fn classifies_notification() {
        let msg = Message::parse(
            r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":3}}"#,
        )
        .unwrap();
        assert!(matches!(msg, Message::Notification(_)));
    }

    #[test]
    fn garbage_is_parse_error() {
        let err = Message::parse("not json").unwrap_err();
        assert_eq!(err.code, PARSE_ERROR);
    }

    #[test]
    fn idless_methodless_frame_is_invalid() {
        let err = Message::parse(r#"{"jsonrpc":"2.0","result":1}"#).unwrap_err();
        assert_eq!(err.code, INVALID_REQUEST);
    }

    #[test]
    fn frames_end_with_newline() {
        let response = Response::success(json!(1), json!({"ok": true}));
        let frame = to_frame(&response);
        assert!(frame.ends_with('\n'));
        assert!(!frame[..frame.len() - 1].contains('\n'));
    }

    #[test]
    fn assist_error_maps_to_rpc_error() {
        let err = crate::error::AssistError::not_found("no such tool").with_hint("run tools/list");
        let rpc: RpcError = (&err).into();
        assert_eq!(rpc.code, -32001);
        assert_eq!(rpc.data.as_ref().unwrap()["hint"], "run tools/list");
    }
}
