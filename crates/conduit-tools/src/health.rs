//! Pure health projection.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use conduit_error::StructuredError;
use conduit_protocol::ToolContext;
use conduit_registry::ToolHandler;
use conduit_resources::ResourceManager;

/// Static identity/configuration summary reported alongside live
/// telemetry.
#[derive(Debug, Clone)]
pub struct HealthSummary {
    /// Advertised server name.
    pub server_name: String,
    /// Advertised server version.
    pub server_version: String,
    /// Number of tools currently registered.
    pub tools_registered: usize,
    /// The resolved `maxConcurrentExecutions`.
    pub max_concurrent_executions: u64,
    /// The resolved `maxPayloadBytes`.
    pub max_payload_bytes: usize,
}

/// `health` tool: a side-effect-free snapshot of server identity,
/// configuration, and live resource telemetry. Checks the abort signal at
/// entry so a cancelled invocation skips the snapshot work entirely.
pub struct HealthTool {
    summary: HealthSummary,
    resources: Arc<ResourceManager>,
}

impl HealthTool {
    /// Create a health tool reporting `summary`, backed by `resources` for
    /// live telemetry.
    #[must_use]
    pub fn new(summary: HealthSummary, resources: Arc<ResourceManager>) -> Self {
        Self { summary, resources }
    }
}

#[async_trait]
impl ToolHandler for HealthTool {
    async fn call(&self, _arguments: Value, ctx: ToolContext) -> Result<Value, StructuredError> {
        if ctx.abort_signal.is_cancelled() {
            return Ok(Value::Null);
        }

        let telemetry = self.resources.telemetry();
        let health = self.resources.health_status();

        Ok(serde_json::json!({
            "server": {
                "name": self.summary.server_name,
                "version": self.summary.server_version,
            },
            "configuration": {
                "toolsRegistered": self.summary.tools_registered,
                "maxConcurrentExecutions": self.summary.max_concurrent_executions,
                "maxPayloadBytes": self.summary.max_payload_bytes,
            },
            "telemetry": telemetry,
            "health": health,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_protocol::Transport;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ToolContext {
        ToolContext {
            run_id: "run-1".to_string(),
            correlation_id: "corr-1".to_string(),
            logger: conduit_core::Logger::stderr(),
            abort_signal: CancellationToken::new(),
            transport: Transport::Stdio,
        }
    }

    #[tokio::test]
    async fn reports_health_status_and_telemetry() {
        let resources = Arc::new(ResourceManager::new(4, 1024));
        let summary = HealthSummary {
            server_name: "conduit".to_string(),
            server_version: "0.1.0".to_string(),
            tools_registered: 3,
            max_concurrent_executions: 4,
            max_payload_bytes: 1024,
        };
        let tool = HealthTool::new(summary, resources);
        let result = tool.call(Value::Null, ctx()).await.unwrap();
        assert_eq!(result["server"]["name"], "conduit");
        assert_eq!(result["health"], "healthy");
    }

    #[tokio::test]
    async fn cancelled_invocation_returns_early() {
        let resources = Arc::new(ResourceManager::new(4, 1024));
        let summary = HealthSummary {
            server_name: "conduit".to_string(),
            server_version: "0.1.0".to_string(),
            tools_registered: 0,
            max_concurrent_executions: 4,
            max_payload_bytes: 1024,
        };
        let tool = HealthTool::new(summary, resources);
        let mut context = ctx();
        context.abort_signal.cancel();
        let result = tool.call(Value::Null, context).await.unwrap();
        assert_eq!(result, Value::Null);
    }
}
