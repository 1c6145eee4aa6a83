//! Closed error taxonomy and wire-level error projections.
//!
//! This crate is deliberately small: it owns the seven-variant [`ErrorCode`]
//! taxonomy and seven-variant [`Outcome`] classification that every other
//! crate in the workspace maps into at its boundary, plus the two
//! serialization functions that turn a [`StructuredError`] into the shapes
//! the wire protocol actually carries — a JSON-RPC error object or a tool
//! result with `isError: true`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of error codes this system ever surfaces to a caller.
///
/// Closed deliberately: every error that crosses a crate boundary is
/// re-classified into one of these seven variants rather than carrying an
/// open-ended, ever-growing enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Arguments failed schema validation, had the wrong shape, or an
    /// envelope failed to decode.
    InvalidArgument,
    /// An agent id or tool name was not registered.
    NotFound,
    /// A tool invocation exceeded its deadline.
    Timeout,
    /// A concurrency slot or payload-size limit was exhausted.
    ResourceExhausted,
    /// An uncategorized handler failure.
    Internal,
    /// An admin-gated operation was rejected by policy.
    Unauthorized,
    /// A method was dispatched before the session reached `RUNNING`.
    NotInitialized,
}

impl ErrorCode {
    /// The authoritative mapping from this taxonomy to JSON-RPC 2.0 numeric
    /// error codes. `NotInitialized` is the only taxonomy member with its
    /// own dedicated JSON-RPC code; the rest share `-32603` (internal)
    /// unless the caller picks a more specific standard code via
    /// [`JsonRpcCode`] directly (e.g. invalid params).
    #[must_use]
    pub const fn jsonrpc_code(self) -> i64 {
        match self {
            Self::NotInitialized => JsonRpcCode::NOT_INITIALIZED,
            Self::InvalidArgument => JsonRpcCode::INVALID_PARAMS,
            _ => JsonRpcCode::INTERNAL_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::Timeout => "TIMEOUT",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Internal => "INTERNAL",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotInitialized => "NOT_INITIALIZED",
        };
        f.write_str(s)
    }
}

/// The closed set of tool-invocation outcome classifications.
///
/// Outcomes are never sent to the caller directly — they exist so the
/// structured logger can record what actually happened to an invocation
/// after its response (if any) has already been emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Handler resolved before the timeout; result delivered.
    Success,
    /// Handler resolved with a tool-level error.
    ToolError,
    /// Timer fired before the handler resolved; a `TIMEOUT` error was
    /// already returned to the caller.
    Timeout,
    /// Handler resolved successfully *after* a timeout had already been
    /// returned to the caller. The result is not delivered.
    LateCompleted,
    /// The connection closed while the handler was still running.
    Aborted,
    /// Handler resolved after the connection had already closed.
    DisconnectedCompleted,
    /// The request never reached handler dispatch (malformed frame, gate
    /// rejection, unknown method, bad argument shape).
    ProtocolError,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::ToolError => "tool_error",
            Self::Timeout => "timeout",
            Self::LateCompleted => "late_completed",
            Self::Aborted => "aborted",
            Self::DisconnectedCompleted => "disconnected_completed",
            Self::ProtocolError => "protocol_error",
        };
        f.write_str(s)
    }
}

/// Raw JSON-RPC 2.0 numeric error codes. Kept separate from [`ErrorCode`]
/// because a handful of protocol-level failures (parse errors, malformed
/// requests, unknown methods, bad argument shapes) never enter the
/// taxonomy at all — they are rejected before a tool or session error could
/// even be constructed.
pub struct JsonRpcCode;

impl JsonRpcCode {
    /// The request body could not be parsed as JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// The request was not a well-formed JSON-RPC 2.0 object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The requested method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// `params`/`arguments` had the wrong shape.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Uncategorized server-side failure.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// The session has not completed the initialization handshake.
    pub const NOT_INITIALIZED: i64 = -32002;
}

/// A taxonomy error plus its human-readable message and optional structured
/// payload, ready to be projected onto either wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// The taxonomy classification.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional machine-readable detail (e.g. schema validation errors).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StructuredError {
    /// Construct a new structured error with no additional data.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach machine-readable detail to this error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StructuredError {}

/// Context attached to every error surfaced through either wire shape so a
/// log line can be cross-referenced after the fact.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Process-level id tying together requests, logs, and errors for a
    /// logical operation.
    pub correlation_id: String,
    /// Per-invocation id, present once a tool invocation has been admitted.
    pub run_id: Option<String>,
}

/// Serialize a `(code, message)` pair — plus optional `data` and `id` — into
/// the standard JSON-RPC 2.0 error response shape.
///
/// `id` defaults to JSON `null` when absent, matching parse-error responses
/// which never have a request id to echo.
#[must_use]
pub fn to_jsonrpc_error(code: i64, message: impl Into<String>, data: Option<Value>, id: Option<Value>) -> Value {
    let mut error = serde_json::json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(data) = data {
        error["data"] = data;
    }
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id.unwrap_or(Value::Null),
        "error": error,
    })
}

/// Build the `data` object every gate/dispatch error carries:
/// `{code, message, correlationId}`.
#[must_use]
pub fn not_initialized_data(correlation_id: &str) -> Value {
    serde_json::json!({
        "code": ErrorCode::NotInitialized.to_string(),
        "message": "Not initialized",
        "correlationId": correlation_id,
    })
}

/// Project a [`StructuredError`] onto the sole shape errors take when
/// surfaced through a tool result: `{isError: true, content: [...]}`, with
/// `correlationId` (and `runId`, if set) merged into the serialized error
/// body. This is the only function in the workspace allowed to build a tool
/// error payload — every pipeline stage that fails routes through here.
#[must_use]
pub fn to_tool_error(error: &StructuredError, ctx: &ErrorContext) -> Value {
    let mut body = serde_json::to_value(error).unwrap_or_else(|_| serde_json::json!({}));
    if let Value::Object(ref mut map) = body {
        map.insert("correlationId".to_string(), Value::String(ctx.correlation_id.clone()));
        if let Some(run_id) = &ctx.run_id {
            map.insert("runId".to_string(), Value::String(run_id.clone()));
        }
    }
    serde_json::json!({
        "isError": true,
        "content": [
            { "type": "text", "text": body.to_string() }
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn jsonrpc_error_defaults_id_to_null() {
        let v = to_jsonrpc_error(JsonRpcCode::PARSE_ERROR, "bad json", None, None);
        assert_eq!(v["id"], Value::Null);
        assert_eq!(v["error"]["code"], JsonRpcCode::PARSE_ERROR);
        assert!(v["error"].get("data").is_none());
    }

    #[test]
    fn jsonrpc_error_preserves_given_id() {
        let v = to_jsonrpc_error(JsonRpcCode::METHOD_NOT_FOUND, "nope", None, Some(Value::from(7)));
        assert_eq!(v["id"], Value::from(7));
    }

    #[test]
    fn tool_error_shape_has_isError_and_content() {
        let err = StructuredError::new(ErrorCode::InvalidArgument, "missing field");
        let ctx = ErrorContext { correlation_id: "corr-1".into(), run_id: Some("run-1".into()) };
        let v = to_tool_error(&err, &ctx);
        assert_eq!(v["isError"], true);
        let text = v["content"][0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["correlationId"], "corr-1");
        assert_eq!(parsed["runId"], "run-1");
        assert_eq!(parsed["code"], "INVALID_ARGUMENT");
    }

    #[test]
    fn tool_error_omits_run_id_when_absent() {
        let err = StructuredError::new(ErrorCode::Timeout, "deadline exceeded");
        let ctx = ErrorContext { correlation_id: "corr-2".into(), run_id: None };
        let v = to_tool_error(&err, &ctx);
        let text = v["content"][0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert!(parsed.get("runId").is_none());
    }

    #[test]
    fn not_initialized_has_its_own_jsonrpc_code() {
        assert_eq!(ErrorCode::NotInitialized.jsonrpc_code(), -32002);
    }

    #[test]
    fn outcome_display_is_snake_case() {
        assert_eq!(Outcome::LateCompleted.to_string(), "late_completed");
        assert_eq!(Outcome::DisconnectedCompleted.to_string(), "disconnected_completed");
    }
}
