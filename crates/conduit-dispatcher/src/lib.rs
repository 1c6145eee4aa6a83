//! Line-delimited JSON-RPC 2.0 parsing, the initialization gate, and method
//! routing.
//!
//! One line in, at most one line out: [`Dispatcher::dispatch`] never
//! suspends across the framing/gate/routing steps themselves — only the
//! routed operation (`tools/call`'s pipeline) suspends.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use conduit_core::{IdGenerator, Logger};
use conduit_error::{to_jsonrpc_error, ErrorCode, JsonRpcCode, StructuredError};
use conduit_protocol::{Response, Transport, JSONRPC_VERSION};
use conduit_registry::ToolRegistry;
use conduit_resources::ResourceManager;
use conduit_session::{check_gate, Session, Transition};
use conduit_tools::{check_admin_policy, AdminPolicy, AgentSendMessageTool, EchoTool, HealthSummary, HealthTool};

/// Static identity advertised in the `initialize` response.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    /// Advertised server name.
    pub name: String,
    /// Advertised server version.
    pub version: String,
    /// The MCP protocol version this server speaks.
    pub protocol_version: String,
}

/// Everything the dispatcher needs to route a request, assembled once at
/// startup by `conduit-server`.
pub struct Dispatcher {
    identity: ServerIdentity,
    session: Arc<Session>,
    registry: Arc<ToolRegistry>,
    resources: Arc<ResourceManager>,
    ids: Arc<dyn IdGenerator>,
    logger: Logger,
    default_timeout: Duration,
    max_payload_bytes: usize,
    admin_policy: AdminPolicy,
    admin_registration_enabled: bool,
    coordinator: Option<Arc<conduit_agents::Coordinator>>,
}

impl Dispatcher {
    /// Assemble a dispatcher. `coordinator` is `None` when the agent
    /// façade is not wired (dynamic `agentProxy` registration is then
    /// unavailable and fails with `INVALID_ARGUMENT`).
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: ServerIdentity,
        session: Arc<Session>,
        registry: Arc<ToolRegistry>,
        resources: Arc<ResourceManager>,
        ids: Arc<dyn IdGenerator>,
        logger: Logger,
        default_timeout: Duration,
        max_payload_bytes: usize,
        admin_policy: AdminPolicy,
        admin_registration_enabled: bool,
        coordinator: Option<Arc<conduit_agents::Coordinator>>,
    ) -> Self {
        Self {
            identity,
            session,
            registry,
            resources,
            ids,
            logger,
            default_timeout,
            max_payload_bytes,
            admin_policy,
            admin_registration_enabled,
            coordinator,
        }
    }

    /// Apply the connection-close transition (idempotent from any state).
    /// Call once the transport reader observes EOF/disconnect.
    pub fn close(&self) {
        let _ = self.session.apply(Transition::Close);
    }

    /// Dispatch one framed line. Returns the response line to write back,
    /// or `None` when no response is owed (notifications, and aborted
    /// `tools/call` invocations whose connection is already gone).
    pub async fn dispatch(&self, line: &str, connection_closed: CancellationToken) -> Option<String> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return Some(self.error_line(Value::Null, JsonRpcCode::PARSE_ERROR, e.to_string(), None));
            }
        };

        let Value::Object(obj) = &value else {
            return Some(self.error_line(Value::Null, JsonRpcCode::INVALID_REQUEST, "request must be a JSON object", None));
        };

        let jsonrpc_ok = obj.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION);
        let method = obj.get("method").and_then(Value::as_str).map(str::to_string);
        let id = obj.get("id").cloned();
        let is_notification = id.is_none();

        let (Some(method), true) = (method, jsonrpc_ok) else {
            if is_notification {
                return None;
            }
            return Some(self.error_line(
                id.unwrap_or(Value::Null),
                JsonRpcCode::INVALID_REQUEST,
                "request must carry jsonrpc:\"2.0\" and a string method",
                None,
            ));
        };

        let params = obj.get("params").cloned();
        let meta = params.as_ref().and_then(|p| p.get("_meta")).cloned();
        let correlation_id = self.session.correlation_id_for(meta.as_ref());

        if let Err(rejection) = check_gate(&self.session, transition_for(&method), meta.as_ref()) {
            if is_notification {
                return None;
            }
            return Some(
                Response::error(id.unwrap_or(Value::Null), rejection.jsonrpc_code, "Not initialized", Some(rejection.data))
                    .to_line(),
            );
        }

        let outcome = self.route(&method, params, &correlation_id, connection_closed).await;

        if is_notification {
            return None;
        }
        let id = id.unwrap_or(Value::Null);
        match outcome {
            RouteOutcome::Success(result) => Some(Response::success(id, result).to_line()),
            RouteOutcome::JsonRpcError { code, message, data } => {
                Some(Response::error(id, code, message, data).to_line())
            }
            RouteOutcome::Suppressed => None,
        }
    }

    async fn route(
        &self,
        method: &str,
        params: Option<Value>,
        correlation_id: &str,
        connection_closed: CancellationToken,
    ) -> RouteOutcome {
        match method {
            "initialize" => self.handle_initialize(),
            "initialized" => {
                if let Err(e) = self.session.apply(Transition::Initialized) {
                    self.logger.warn("initialized received out of order", Some(&warn_ctx(&e.to_string())));
                }
                RouteOutcome::Suppressed
            }
            "tools/list" => {
                let tools = self.registry.list();
                RouteOutcome::Success(serde_json::json!({ "tools": tools }))
            }
            "tools/call" => self.handle_tools_call(params, connection_closed).await,
            "admin/registerTool" => self.handle_register_tool(params),
            "admin/unregisterTool" => self.handle_unregister_tool(params),
            _ => RouteOutcome::JsonRpcError {
                code: JsonRpcCode::METHOD_NOT_FOUND,
                message: format!("unknown method: {method}"),
                data: Some(serde_json::json!({ "correlationId": correlation_id })),
            },
        }
    }

    fn handle_initialize(&self) -> RouteOutcome {
        if let Err(e) = self.session.apply(Transition::Initialize) {
            return RouteOutcome::JsonRpcError {
                code: JsonRpcCode::INVALID_REQUEST,
                message: e.to_string(),
                data: None,
            };
        }
        RouteOutcome::Success(serde_json::json!({
            "protocolVersion": self.identity.protocol_version,
            "serverInfo": { "name": self.identity.name, "version": self.identity.version },
            "capabilities": { "tools": {} },
        }))
    }

    async fn handle_tools_call(&self, params: Option<Value>, connection_closed: CancellationToken) -> RouteOutcome {
        let name = params.as_ref().and_then(|p| p.get("name")).and_then(Value::as_str).map(str::to_string);
        let Some(name) = name else {
            return RouteOutcome::JsonRpcError {
                code: JsonRpcCode::INVALID_PARAMS,
                message: "tools/call requires a string \"name\"".to_string(),
                data: None,
            };
        };
        let arguments = params.as_ref().and_then(|p| p.get("arguments")).cloned();
        let meta_correlation_id = params
            .as_ref()
            .and_then(|p| p.get("_meta"))
            .and_then(|m| m.get("correlationId"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let outcome = conduit_pipeline::invoke(
            self.registry.clone(),
            self.resources.clone(),
            self.ids.clone(),
            self.logger.clone(),
            connection_closed,
            name,
            arguments,
            meta_correlation_id,
            self.session.transport,
            self.default_timeout,
        )
        .await;

        match outcome {
            conduit_pipeline::CallOutcome::ProtocolError { jsonrpc_code, message } => {
                RouteOutcome::JsonRpcError { code: jsonrpc_code, message, data: None }
            }
            conduit_pipeline::CallOutcome::ToolResult(value) => RouteOutcome::Success(value),
            conduit_pipeline::CallOutcome::Aborted => RouteOutcome::Suppressed,
        }
    }

    fn handle_register_tool(&self, params: Option<Value>) -> RouteOutcome {
        if let Err(e) = self.admin_precheck() {
            return RouteOutcome::from_structured(e);
        }

        let Some(obj) = params.as_ref() else {
            return RouteOutcome::invalid_params("admin/registerTool requires params");
        };
        let name = obj.get("name").and_then(Value::as_str).map(str::to_string);
        let description = obj.get("description").and_then(Value::as_str).map(str::to_string);
        let tool_type = obj.get("toolType").and_then(Value::as_str).map(str::to_string);
        let (Some(name), Some(description), Some(tool_type)) = (name, description, tool_type) else {
            return RouteOutcome::invalid_params("name, description, and toolType are required");
        };
        let version = obj.get("version").and_then(Value::as_str).map(str::to_string);
        let input_schema = obj
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "type": "object" }));

        let handler = match self.build_tool_handler(&tool_type) {
            Ok(h) => h,
            Err(e) => return RouteOutcome::from_structured(e),
        };

        let definition = conduit_protocol::ToolDefinition {
            name: name.clone(),
            description,
            input_schema,
            version,
            is_dynamic: true,
        };

        match self.registry.register(definition, handler, &self.logger) {
            Ok(()) => RouteOutcome::Success(serde_json::json!({ "success": true, "toolName": name })),
            Err(e) => RouteOutcome::from_structured(e.into()),
        }
    }

    fn handle_unregister_tool(&self, params: Option<Value>) -> RouteOutcome {
        if let Err(e) = self.admin_precheck() {
            return RouteOutcome::from_structured(e);
        }
        let Some(name) = params.as_ref().and_then(|p| p.get("name")).and_then(Value::as_str) else {
            return RouteOutcome::invalid_params("admin/unregisterTool requires a string \"name\"");
        };
        let found = self.registry.unregister(name);
        RouteOutcome::Success(serde_json::json!({ "success": true, "found": found, "toolName": name }))
    }

    fn admin_precheck(&self) -> Result<(), StructuredError> {
        if !self.admin_registration_enabled {
            return Err(StructuredError::new(ErrorCode::Unauthorized, "admin registration is disabled"));
        }
        check_admin_policy(&self.admin_policy, self.session.transport)
    }

    fn build_tool_handler(&self, tool_type: &str) -> Result<Arc<dyn conduit_registry::ToolHandler>, StructuredError> {
        match tool_type {
            "echo" => Ok(Arc::new(EchoTool)),
            "health" => {
                let summary = HealthSummary {
                    server_name: self.identity.name.clone(),
                    server_version: self.identity.version.clone(),
                    tools_registered: self.registry.list().len(),
                    max_concurrent_executions: self.resources.telemetry().max_concurrent_executions,
                    max_payload_bytes: self.max_payload_bytes,
                };
                Ok(Arc::new(HealthTool::new(summary, self.resources.clone())))
            }
            "agentProxy" => {
                let coordinator = self.coordinator.clone().ok_or_else(|| {
                    StructuredError::new(ErrorCode::InvalidArgument, "agent coordinator is not configured")
                })?;
                Ok(Arc::new(AgentSendMessageTool::new(coordinator, self.resources.clone())))
            }
            other => Err(StructuredError::new(ErrorCode::InvalidArgument, format!("unknown toolType: {other}"))),
        }
    }

    fn error_line(&self, id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> String {
        let value = to_jsonrpc_error(code, message, data, Some(id));
        value.to_string()
    }
}

enum RouteOutcome {
    Success(Value),
    JsonRpcError { code: i64, message: String, data: Option<Value> },
    Suppressed,
}

impl RouteOutcome {
    fn from_structured(err: StructuredError) -> Self {
        Self::JsonRpcError { code: err.code.jsonrpc_code(), message: err.message, data: err.data }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self::JsonRpcError { code: JsonRpcCode::INVALID_PARAMS, message: message.into(), data: None }
    }
}

fn transition_for(method: &str) -> Transition {
    match method {
        "initialize" => Transition::Initialize,
        "initialized" => Transition::Initialized,
        _ => Transition::Other,
    }
}

fn warn_ctx(message: &str) -> serde_json::Map<String, Value> {
    let mut ctx = serde_json::Map::new();
    ctx.insert("reason".to_string(), Value::String(message.to_string()));
    ctx
}
