//! The `tools/call` invocation pipeline: argument shape, precompiled
//! validation, payload size, admission, context construction, the
//! timeout/cancellation race, and outcome classification.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use conduit_core::{IdGenerator, Logger};
use conduit_error::{to_tool_error, ErrorCode, ErrorContext, JsonRpcCode, StructuredError};
use conduit_protocol::{Transport, ToolContext};
use conduit_registry::ToolRegistry;
use conduit_resources::ResourceManager;

/// Result of running the pipeline to completion from the caller's
/// perspective. `Aborted` carries nothing to deliver — the connection that
/// would have received it is already gone.
pub enum CallOutcome {
    /// The call never reached handler dispatch; the caller must emit this
    /// as a JSON-RPC error, not a tool result.
    ProtocolError {
        /// JSON-RPC numeric code.
        jsonrpc_code: i64,
        /// Human readable message.
        message: String,
    },
    /// A tool result, shaped `{content: [...], isError: bool}`.
    ToolResult(Value),
    /// The connection closed before the handler (or the timeout race)
    /// settled; there is no caller left to deliver a result to.
    Aborted,
}

/// Reject non-object `arguments`. `None`/`null` are treated as `{}`.
fn normalize_arguments(raw: Option<Value>) -> Result<Value, ()> {
    match raw {
        None => Ok(Value::Object(serde_json::Map::new())),
        Some(Value::Null) => Ok(Value::Object(serde_json::Map::new())),
        Some(v @ Value::Object(_)) => Ok(v),
        Some(_) => Err(()),
    }
}

/// Wrap a handler's successful return value in the `{content, isError}`
/// shape every tool result takes on the wire.
fn wrap_success(value: Value) -> Value {
    serde_json::json!({
        "content": [ { "type": "text", "text": value.to_string() } ],
        "isError": false,
    })
}

/// Run the full invocation pipeline for a single `tools/call`.
///
/// `connection_closed` is a token shared with the transport layer: it fires
/// when the client connection goes away mid-invocation, distinct from the
/// per-invocation `abort_signal` minted inside this function for the
/// timeout race.
#[allow(clippy::too_many_arguments)]
pub async fn invoke(
    registry: Arc<ToolRegistry>,
    resources: Arc<ResourceManager>,
    ids: Arc<dyn IdGenerator>,
    logger: Logger,
    connection_closed: CancellationToken,
    name: String,
    arguments_raw: Option<Value>,
    meta_correlation_id: Option<String>,
    transport: Transport,
    timeout_duration: Duration,
) -> CallOutcome {
    let Some(tool) = registry.get(&name) else {
        return CallOutcome::ProtocolError {
            jsonrpc_code: JsonRpcCode::METHOD_NOT_FOUND,
            message: format!("unknown tool: {name}"),
        };
    };

    let arguments = match normalize_arguments(arguments_raw) {
        Ok(v) => v,
        Err(()) => {
            return CallOutcome::ProtocolError {
                jsonrpc_code: JsonRpcCode::INVALID_PARAMS,
                message: "arguments must be an object".to_string(),
            }
        }
    };

    let correlation_id = meta_correlation_id.unwrap_or_else(|| ids.next_id("corr"));
    let ctx_no_run = ErrorContext { correlation_id: correlation_id.clone(), run_id: None };

    if !tool.validator.is_valid(&arguments) {
        let messages: Vec<String> = tool.validator.iter_errors(&arguments).map(|e| e.to_string()).collect();
        let err = StructuredError::new(ErrorCode::InvalidArgument, "arguments failed schema validation")
            .with_data(serde_json::json!({ "errors": messages }));
        return CallOutcome::ToolResult(to_tool_error(&err, &ctx_no_run));
    }

    if let Err(err) = resources.validate_payload_size(&arguments) {
        return CallOutcome::ToolResult(to_tool_error(&err, &ctx_no_run));
    }

    let slot = match resources.try_acquire_slot() {
        Ok(slot) => slot,
        Err(err) => return CallOutcome::ToolResult(to_tool_error(&err, &ctx_no_run)),
    };

    let run_id = ids.next_id("run");
    let abort_signal = CancellationToken::new();
    let mut child_ctx = serde_json::Map::new();
    child_ctx.insert("runId".to_string(), Value::String(run_id.clone()));
    child_ctx.insert("correlationId".to_string(), Value::String(correlation_id.clone()));
    let child_logger = logger.child(child_ctx);

    let tool_ctx = ToolContext {
        run_id: run_id.clone(),
        correlation_id: correlation_id.clone(),
        logger: child_logger.clone(),
        abort_signal: abort_signal.clone(),
        transport,
    };

    let handler = tool.handler.clone();
    // Spawned, not `select!`-raced directly: the handler must keep running
    // after a timeout is returned to the caller (late completion), which a
    // bare `select!` over the operation future would otherwise drop.
    let mut join = tokio::spawn(async move { handler.call(arguments, tool_ctx).await });

    let ctx_with_run = ErrorContext { correlation_id: correlation_id.clone(), run_id: Some(run_id.clone()) };

    tokio::select! {
        res = &mut join => {
            drop(slot);
            match res {
                Ok(Ok(value)) => CallOutcome::ToolResult(wrap_success(value)),
                Ok(Err(err)) => CallOutcome::ToolResult(to_tool_error(&err, &ctx_with_run)),
                Err(join_err) => {
                    let err = StructuredError::new(ErrorCode::Internal, format!("tool handler panicked: {join_err}"));
                    CallOutcome::ToolResult(to_tool_error(&err, &ctx_with_run))
                }
            }
        }
        () = tokio::time::sleep(timeout_duration) => {
            abort_signal.cancel();
            spawn_late_watcher(join, slot, child_logger.clone(), run_id.clone(), correlation_id.clone(), LateKind::Timeout);
            let err = StructuredError::new(
                ErrorCode::Timeout,
                format!("tool '{name}' exceeded {}ms", timeout_duration.as_millis()),
            );
            CallOutcome::ToolResult(to_tool_error(&err, &ctx_with_run))
        }
        () = connection_closed.cancelled() => {
            abort_signal.cancel();
            spawn_late_watcher(join, slot, child_logger.clone(), run_id.clone(), correlation_id.clone(), LateKind::Disconnected);
            CallOutcome::Aborted
        }
    }
}

#[derive(Clone, Copy)]
enum LateKind {
    Timeout,
    Disconnected,
}

/// Wait for a handler that lost the timeout/disconnect race to settle,
/// release its slot exactly once, and log the final classification
/// (`late_completed`/`tool_error` or `disconnected_completed`). Never
/// delivers a result to the caller — that response has already been sent
/// (or there is no longer a connection to send it to).
fn spawn_late_watcher(
    join: tokio::task::JoinHandle<Result<Value, StructuredError>>,
    slot: conduit_resources::Slot,
    logger: Logger,
    run_id: String,
    correlation_id: String,
    kind: LateKind,
) {
    tokio::spawn(async move {
        let result = join.await;
        drop(slot);
        let mut ctx = serde_json::Map::new();
        ctx.insert("runId".to_string(), Value::String(run_id));
        ctx.insert("correlationId".to_string(), Value::String(correlation_id));
        let (message, outcome) = match (kind, &result) {
            (LateKind::Timeout, Ok(Ok(_))) => ("tool call completed after its timeout had already been returned", "late_completed"),
            (LateKind::Timeout, Ok(Err(_))) => ("tool call failed after its timeout had already been returned", "tool_error"),
            (LateKind::Timeout, Err(_)) => ("tool call panicked after its timeout had already been returned", "late_completed"),
            (LateKind::Disconnected, _) => ("tool call completed after the connection had already closed", "disconnected_completed"),
        };
        ctx.insert("outcome".to_string(), Value::String(outcome.to_string()));
        logger.warn(message, Some(&ctx));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_core::{DeterministicIdGenerator, LoggerConfig};
    use conduit_registry::ToolHandler;
    use std::time::Duration as StdDuration;

    struct Echo;
    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, arguments: Value, _ctx: ToolContext) -> Result<Value, StructuredError> {
            Ok(arguments)
        }
    }

    struct Sleepy(StdDuration);
    #[async_trait]
    impl ToolHandler for Sleepy {
        async fn call(&self, arguments: Value, _ctx: ToolContext) -> Result<Value, StructuredError> {
            tokio::time::sleep(self.0).await;
            Ok(arguments)
        }
    }

    fn echo_def() -> conduit_protocol::ToolDefinition {
        conduit_protocol::ToolDefinition {
            name: "echo".to_string(),
            description: "echoes".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"],
            }),
            version: None,
            is_dynamic: false,
        }
    }

    fn setup(handler: Arc<dyn ToolHandler>) -> (Arc<ToolRegistry>, Arc<ResourceManager>, Arc<dyn IdGenerator>, Logger) {
        let registry = Arc::new(ToolRegistry::new());
        let logger = Logger::new(LoggerConfig::default(), Box::new(Vec::<u8>::new()));
        registry.register(echo_def(), handler, &logger).unwrap();
        let resources = Arc::new(ResourceManager::new(4, 1024 * 1024));
        let ids: Arc<dyn IdGenerator> = Arc::new(DeterministicIdGenerator::new("t"));
        (registry, resources, ids, logger)
    }

    #[tokio::test]
    async fn unknown_tool_is_protocol_error() {
        let (registry, resources, ids, logger) = setup(Arc::new(Echo));
        let outcome = invoke(
            registry, resources, ids, logger, CancellationToken::new(),
            "nope".to_string(), None, None, Transport::Stdio, StdDuration::from_millis(100),
        ).await;
        assert!(matches!(outcome, CallOutcome::ProtocolError { jsonrpc_code, .. } if jsonrpc_code == JsonRpcCode::METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn array_arguments_are_protocol_error() {
        let (registry, resources, ids, logger) = setup(Arc::new(Echo));
        let outcome = invoke(
            registry, resources, ids, logger, CancellationToken::new(),
            "echo".to_string(), Some(Value::Array(vec![])), None, Transport::Stdio, StdDuration::from_millis(100),
        ).await;
        assert!(matches!(outcome, CallOutcome::ProtocolError { jsonrpc_code, .. } if jsonrpc_code == JsonRpcCode::INVALID_PARAMS));
    }

    #[tokio::test]
    async fn missing_required_field_is_tool_error() {
        let (registry, resources, ids, logger) = setup(Arc::new(Echo));
        let outcome = invoke(
            registry, resources, ids, logger, CancellationToken::new(),
            "echo".to_string(), Some(serde_json::json!({})), None, Transport::Stdio, StdDuration::from_millis(100),
        ).await;
        match outcome {
            CallOutcome::ToolResult(v) => {
                assert_eq!(v["isError"], true);
                let text = v["content"][0]["text"].as_str().unwrap();
                assert!(text.contains("INVALID_ARGUMENT"));
            }
            _ => panic!("expected tool result"),
        }
    }

    #[tokio::test]
    async fn success_wraps_result_with_is_error_false() {
        let (registry, resources, ids, logger) = setup(Arc::new(Echo));
        let outcome = invoke(
            registry, resources, ids, logger, CancellationToken::new(),
            "echo".to_string(), Some(serde_json::json!({"message": "hi"})), None, Transport::Stdio,
            StdDuration::from_millis(200),
        ).await;
        match outcome {
            CallOutcome::ToolResult(v) => assert_eq!(v["isError"], false),
            _ => panic!("expected tool result"),
        }
    }

    #[tokio::test]
    async fn slow_handler_times_out_and_slot_is_released() {
        let (registry, resources, ids, logger) =
            setup(Arc::new(Sleepy(StdDuration::from_millis(300))));
        let resources_check = resources.clone();
        let outcome = invoke(
            registry, resources, ids, logger, CancellationToken::new(),
            "echo".to_string(), Some(serde_json::json!({"message": "hi"})), None, Transport::Stdio,
            StdDuration::from_millis(20),
        ).await;
        match outcome {
            CallOutcome::ToolResult(v) => {
                assert_eq!(v["isError"], true);
                let text = v["content"][0]["text"].as_str().unwrap();
                assert!(text.contains("TIMEOUT"));
            }
            _ => panic!("expected tool result"),
        }
        // Give the late watcher a chance to release the slot.
        tokio::time::sleep(StdDuration::from_millis(400)).await;
        assert_eq!(resources_check.telemetry().concurrent_executions, 0);
    }
}
