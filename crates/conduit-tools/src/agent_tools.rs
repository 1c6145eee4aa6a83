//! The agent façade: `agent/sendMessage`, `agent/list`, `agent/getState`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use conduit_agents::Coordinator;
use conduit_core::logger::redact;
use conduit_error::{ErrorCode, StructuredError};
use conduit_protocol::ToolContext;
use conduit_registry::ToolHandler;
use conduit_resources::ResourceManager;

/// The source id attributed to every facade-initiated send: these
/// invocations originate from the connected client, not another agent.
const CLIENT_SOURCE_ID: &str = "client";

/// `agent/sendMessage`: forward `{targetAgentId, message}` to the
/// coordinator and await the agent's processed result.
pub struct AgentSendMessageTool {
    coordinator: Arc<Coordinator>,
    resources: Arc<ResourceManager>,
}

impl AgentSendMessageTool {
    /// Create the tool against `coordinator`, enforcing payload size via
    /// `resources`.
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>, resources: Arc<ResourceManager>) -> Self {
        Self { coordinator, resources }
    }
}

#[async_trait]
impl ToolHandler for AgentSendMessageTool {
    async fn call(&self, arguments: Value, _ctx: ToolContext) -> Result<Value, StructuredError> {
        let target_agent_id = arguments
            .get("targetAgentId")
            .and_then(Value::as_str)
            .ok_or_else(|| StructuredError::new(ErrorCode::InvalidArgument, "targetAgentId must be a string"))?;
        let message = arguments
            .get("message")
            .cloned()
            .ok_or_else(|| StructuredError::new(ErrorCode::InvalidArgument, "message is required"))?;

        self.resources.validate_payload_size(&message)?;

        let receiver = self.coordinator.send_message(CLIENT_SOURCE_ID, target_agent_id, message).map_err(|e| {
            use conduit_agents::CoordinatorError;
            match e {
                CoordinatorError::NotFound(id) => {
                    StructuredError::new(ErrorCode::NotFound, format!("agent '{id}' is not registered"))
                }
                other => StructuredError::new(ErrorCode::Internal, other.to_string()),
            }
        })?;

        receiver
            .await
            .map_err(|_| StructuredError::new(ErrorCode::Internal, "agent processor dropped the response channel"))?
    }
}

/// `agent/list`: sorted agent ids, binary-search-truncated to fit the
/// resource manager's payload limit.
pub struct AgentListTool {
    coordinator: Arc<Coordinator>,
    resources: Arc<ResourceManager>,
}

impl AgentListTool {
    /// Create the tool against `coordinator`, bounded by `resources`.
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>, resources: Arc<ResourceManager>) -> Self {
        Self { coordinator, resources }
    }
}

#[async_trait]
impl ToolHandler for AgentListTool {
    async fn call(&self, _arguments: Value, _ctx: ToolContext) -> Result<Value, StructuredError> {
        let ids = self.coordinator.list_agents();

        let full = serde_json::json!({ "agentIds": ids, "truncated": false });
        if self.resources.validate_payload_size(&full).is_ok() {
            return Ok(full);
        }

        let fits = |k: usize| -> bool {
            let candidate = serde_json::json!({ "agentIds": ids[..k], "truncated": true });
            self.resources.validate_payload_size(&candidate).is_ok()
        };
        let prefix_len = largest_fitting_prefix(ids.len(), fits);
        Ok(serde_json::json!({ "agentIds": ids[..prefix_len], "truncated": true }))
    }
}

/// `agent/getState`: the agent's state map, redacted, tiering down from
/// full state to keys-only to a truncated key prefix as needed to stay
/// under `maxStateBytes`.
pub struct AgentGetStateTool {
    coordinator: Arc<Coordinator>,
    max_state_bytes: usize,
    redact_keys: Vec<String>,
}

impl AgentGetStateTool {
    /// Create the tool against `coordinator`, capping serialized state at
    /// `max_state_bytes` and redacting `redact_keys` before any size check.
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>, max_state_bytes: usize, redact_keys: Vec<String>) -> Self {
        Self { coordinator, max_state_bytes, redact_keys }
    }

    fn fits(&self, value: &Value) -> bool {
        serde_json::to_vec(value).map(|bytes| bytes.len() <= self.max_state_bytes).unwrap_or(false)
    }
}

#[async_trait]
impl ToolHandler for AgentGetStateTool {
    async fn call(&self, arguments: Value, _ctx: ToolContext) -> Result<Value, StructuredError> {
        let agent_id = arguments
            .get("agentId")
            .and_then(Value::as_str)
            .ok_or_else(|| StructuredError::new(ErrorCode::InvalidArgument, "agentId must be a string"))?;

        let state = self
            .coordinator
            .get_agent_state(agent_id)
            .ok_or_else(|| StructuredError::new(ErrorCode::NotFound, format!("agent '{agent_id}' is not registered")))?;

        let mut snapshot = serde_json::Map::new();
        for entry in state.iter() {
            snapshot.insert(entry.key().clone(), entry.value().clone());
        }
        let redacted = redact(&Value::Object(snapshot), &self.redact_keys);

        let full = serde_json::json!({ "agentId": agent_id, "state": redacted, "truncated": false, "keysOnly": false });
        if self.fits(&full) {
            return Ok(full);
        }

        let mut keys: Vec<String> = match &redacted {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };
        keys.sort();

        let keys_only = serde_json::json!({ "agentId": agent_id, "keys": keys, "truncated": true, "keysOnly": true });
        if self.fits(&keys_only) {
            return Ok(keys_only);
        }

        let fits_prefix = |k: usize| -> bool {
            let candidate = serde_json::json!({ "agentId": agent_id, "keys": keys[..k], "truncated": true, "keysOnly": true });
            self.fits(&candidate)
        };
        let prefix_len = largest_fitting_prefix(keys.len(), fits_prefix);
        Ok(serde_json::json!({ "agentId": agent_id, "keys": keys[..prefix_len], "truncated": true, "keysOnly": true }))
    }
}

/// Binary search the largest `k` in `0..=n` for which `fits(k)` holds,
/// assuming `fits` is monotonic (true for every `k' <= k` once true for
/// `k`). Returns `0` if even the empty prefix does not fit.
fn largest_fitting_prefix(n: usize, fits: impl Fn(usize) -> bool) -> usize {
    if n == 0 || !fits(0) {
        return 0;
    }
    let (mut lo, mut hi) = (0usize, n);
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if fits(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as async_trait_attr;
    use conduit_agents::AgentContext;
    use conduit_core::{DeterministicIdGenerator, Logger};
    use conduit_protocol::Transport;
    use tokio_util::sync::CancellationToken;

    struct Echo;
    #[async_trait_attr]
    impl conduit_agents::AgentHandler for Echo {
        async fn handle(&self, message: Value, _ctx: AgentContext) -> Result<Value, StructuredError> {
            Ok(message)
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            run_id: "run-1".to_string(),
            correlation_id: "corr-1".to_string(),
            logger: Logger::stderr(),
            abort_signal: CancellationToken::new(),
            transport: Transport::Stdio,
        }
    }

    fn coordinator() -> Arc<Coordinator> {
        Arc::new(Coordinator::new(Logger::stderr(), Arc::new(DeterministicIdGenerator::new("t"))))
    }

    #[tokio::test]
    async fn send_message_rejects_unregistered_target() {
        let resources = Arc::new(ResourceManager::new(4, 1024 * 1024));
        let tool = AgentSendMessageTool::new(coordinator(), resources);
        let args = serde_json::json!({ "targetAgentId": "ghost", "message": {"type": "ping", "payload": {}} });
        let err = tool.call(args, ctx()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn send_message_returns_handler_result() {
        let coord = coordinator();
        coord.register_agent("a1", Arc::new(Echo)).unwrap();
        let resources = Arc::new(ResourceManager::new(4, 1024 * 1024));
        let tool = AgentSendMessageTool::new(coord, resources);
        let args = serde_json::json!({ "targetAgentId": "a1", "message": {"type": "ping", "payload": {"x": 1}} });
        let result = tool.call(args, ctx()).await.unwrap();
        assert_eq!(result["type"], "ping");
    }

    #[tokio::test]
    async fn list_truncates_when_oversized() {
        let coord = coordinator();
        for i in 0..50 {
            coord.register_agent(&format!("agent-{i:03}"), Arc::new(Echo)).unwrap();
        }
        let resources = Arc::new(ResourceManager::new(4, 200));
        let tool = AgentListTool::new(coord, resources);
        let result = tool.call(Value::Null, ctx()).await.unwrap();
        assert_eq!(result["truncated"], true);
        assert!(result["agentIds"].as_array().unwrap().len() < 50);
    }

    #[tokio::test]
    async fn get_state_not_found_for_unregistered_agent() {
        let tool = AgentGetStateTool::new(coordinator(), 1024, vec!["secret".to_string()]);
        let err = tool.call(serde_json::json!({"agentId": "ghost"}), ctx()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn get_state_redacts_before_size_check() {
        let coord = coordinator();
        coord.register_agent("a1", Arc::new(Echo)).unwrap();
        let state = coord.get_agent_state("a1").unwrap();
        state.insert("secret".to_string(), Value::String("shh".to_string()));
        state.insert("visible".to_string(), Value::String("ok".to_string()));
        let tool = AgentGetStateTool::new(coord, 1024 * 1024, vec!["secret".to_string()]);
        let result = tool.call(serde_json::json!({"agentId": "a1"}), ctx()).await.unwrap();
        assert_eq!(result["state"]["secret"], "[REDACTED]");
        assert_eq!(result["state"]["visible"], "ok");
    }

    #[tokio::test]
    async fn get_state_falls_back_to_keys_only_then_prefix() {
        let coord = coordinator();
        coord.register_agent("a1", Arc::new(Echo)).unwrap();
        let state = coord.get_agent_state("a1").unwrap();
        for i in 0..50 {
            state.insert(format!("key-{i:03}"), Value::String("x".repeat(50)));
        }
        let tool = AgentGetStateTool::new(coord, 400, vec![]);
        let result = tool.call(serde_json::json!({"agentId": "a1"}), ctx()).await.unwrap();
        assert_eq!(result["keysOnly"], true);
        assert_eq!(result["truncated"], true);
    }
}
