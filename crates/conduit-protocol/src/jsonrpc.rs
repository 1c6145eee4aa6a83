//! Line-delimited JSON-RPC 2.0 message shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The JSON-RPC protocol version string. Every message on the wire carries
/// exactly this value in its `jsonrpc` field.
pub const JSONRPC_VERSION: &str = "2.0";

/// A parsed JSON-RPC request or notification. Requests carry an `id`;
/// notifications omit it — the distinction is made by the caller (the
/// dispatcher), not by this type, since `serde_json::Value` can't
/// distinguish "absent" from "null" on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// Must equal `"2.0"`.
    pub jsonrpc: String,
    /// The method name being invoked.
    pub method: String,
    /// Method parameters, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Present for requests, absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl RawMessage {
    /// A message with no `id` field is a notification per JSON-RPC 2.0.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A successful or failed JSON-RPC response, ready for framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    #[serde(flatten)]
    pub payload: ResponsePayload,
    /// Echoes the originating request's id, or `null` for parse errors that
    /// never got far enough to read one.
    pub id: Value,
}

/// Mutually exclusive success/error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// A successful call result.
    Result {
        /// The method's result value.
        result: Value,
    },
    /// A JSON-RPC level error (never a tool-level error — those are
    /// `Result` payloads shaped like `{isError: true, content: [...]}`).
    Error {
        /// The error object.
        error: ErrorObject,
    },
}

/// The `error` object inside a JSON-RPC error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    /// JSON-RPC numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    /// Build a success response for `id`.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), payload: ResponsePayload::Result { result }, id }
    }

    /// Build an error response for `id` (or `Value::Null` when no id could
    /// be recovered, e.g. on a parse failure).
    #[must_use]
    pub fn error(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            payload: ResponsePayload::Error { error: ErrorObject { code, message: message.into(), data } },
            id,
        }
    }

    /// Serialize to a single framed line (no trailing newline).
    #[must_use]
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"internal serialization failure"}}"#
                .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn notification_has_no_id() {
        let msg: RawMessage = serde_json::from_str(r#"{"jsonrpc":"2.0","method":"initialized"}"#).unwrap();
        assert!(msg.is_notification());
    }

    #[test]
    fn request_has_id() {
        let msg: RawMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"tools/list","id":1}"#).unwrap();
        assert!(!msg.is_notification());
    }

    #[test]
    fn error_response_round_trips() {
        let resp = Response::error(Value::from(3), -32602, "bad params", None);
        let line = resp.to_line();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["error"]["code"], -32602);
        assert_eq!(parsed["id"], 3);
        assert!(parsed.get("result").is_none());
    }
}
