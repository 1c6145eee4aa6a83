//! Top-level wiring: turns a resolved [`Config`] into a ready-to-run
//! [`Dispatcher`] with every component constructed and the built-in
//! static tools pre-registered.

pub mod config;

pub use config::{AacpSection, Config, LoggingSection, ResourcesSection, SecuritySection, ServerSection, ToolsSection};

use std::sync::Arc;
use std::time::Duration;

use conduit_aacp::Ledger;
use conduit_agents::{AacpIntegration, Coordinator};
use conduit_core::{Clock, IdGenerator, Logger, LoggerConfig, MonotonicIdGenerator, SystemClock};
use conduit_dispatcher::{Dispatcher, ServerIdentity};
use conduit_protocol::Transport;
use conduit_registry::ToolRegistry;
use conduit_resources::ResourceManager;
use conduit_session::Session;
use conduit_tools::{AgentGetStateTool, AgentListTool, AgentSendMessageTool, HealthSummary, HealthTool};

/// Every component assembled from a [`Config`], ready to be driven by a
/// transport loop.
pub struct App {
    /// The assembled dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// The agent coordinator, kept alive for the process lifetime even
    /// though the dispatcher only holds a clone of the `Arc`.
    pub coordinator: Arc<Coordinator>,
    /// The tool registry the dispatcher routes against. Exposed so tests
    /// can register additional tools directly, bypassing the admin wire
    /// surface.
    pub registry: Arc<ToolRegistry>,
    /// Graceful-shutdown grace period from `server.shutdown_timeout_ms`.
    pub shutdown_timeout: Duration,
}

/// Build every component named in `config`, wire them together, and
/// register the built-in static tools (`health`, `agent/sendMessage`,
/// `agent/list`, `agent/getState`).
///
/// `transport` selects the connection kind the session is bound to; the
/// binary entry point always passes [`Transport::Stdio`].
#[must_use]
pub fn build(config: &Config, transport: Transport) -> App {
    let logger = Logger::new(
        LoggerConfig { redact_keys: config.logging.redact_keys.clone(), ..LoggerConfig::default() },
        Box::new(std::io::stderr()),
    );
    let ids: Arc<dyn IdGenerator> = Arc::new(MonotonicIdGenerator::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let session = Arc::new(Session::new(ids.next_id("conn"), transport));
    let registry = Arc::new(ToolRegistry::new());
    let resources =
        Arc::new(ResourceManager::new(config.resources.max_concurrent_executions, config.tools.max_payload_bytes));

    let ledger = Arc::new(Ledger::new(clock.clone(), config.aacp.default_ttl_ms));
    let sessions = Arc::new(conduit_aacp::SessionManager::new(ledger.clone(), ids.clone(), clock.clone()));
    let aacp = AacpIntegration { sessions, ledger };

    let mut agent_logger_ctx = serde_json::Map::new();
    agent_logger_ctx.insert("component".to_string(), serde_json::Value::String("agents".to_string()));
    let coordinator = Arc::new(
        Coordinator::new(logger.child(agent_logger_ctx), ids.clone())
            .with_aacp(aacp)
            .with_clock(clock),
    );

    register_builtin_tools(&registry, &resources, &coordinator, config, &logger);

    let identity = ServerIdentity {
        name: config.server.name.clone(),
        version: config.server.version.clone(),
        protocol_version: config.server.protocol_version.clone(),
    };

    let dispatcher = Arc::new(Dispatcher::new(
        identity,
        session,
        registry.clone(),
        resources,
        ids,
        logger,
        Duration::from_millis(config.tools.default_timeout_ms),
        config.tools.max_payload_bytes,
        config.tools.admin_policy.clone(),
        config.tools.admin_registration_enabled && config.security.dynamic_registration_enabled,
        Some(coordinator.clone()),
    ));

    App {
        dispatcher,
        coordinator,
        registry,
        shutdown_timeout: Duration::from_millis(config.server.shutdown_timeout_ms),
    }
}

fn register_builtin_tools(
    registry: &Arc<ToolRegistry>,
    resources: &Arc<ResourceManager>,
    coordinator: &Arc<Coordinator>,
    config: &Config,
    logger: &Logger,
) {
    use conduit_protocol::ToolDefinition;

    let object_schema = |properties: serde_json::Value, required: &[&str]| {
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    };

    let send_def = ToolDefinition {
        name: "agent/sendMessage".to_string(),
        description: "Deliver a message to a registered agent's FIFO queue and await its result.".to_string(),
        input_schema: object_schema(
            serde_json::json!({
                "targetAgentId": { "type": "string" },
                "message": {},
            }),
            &["targetAgentId", "message"],
        ),
        version: None,
        is_dynamic: false,
    };
    let _ = registry.register(
        send_def,
        Arc::new(AgentSendMessageTool::new(coordinator.clone(), resources.clone())),
        logger,
    );

    let list_def = ToolDefinition {
        name: "agent/list".to_string(),
        description: "List registered agent ids, truncating deterministically if the response would exceed the payload limit.".to_string(),
        input_schema: object_schema(serde_json::json!({}), &[]),
        version: None,
        is_dynamic: false,
    };
    let _ =
        registry.register(list_def, Arc::new(AgentListTool::new(coordinator.clone(), resources.clone())), logger);

    let get_state_def = ToolDefinition {
        name: "agent/getState".to_string(),
        description: "Snapshot a registered agent's state map, redacting sensitive keys before any size check.".to_string(),
        input_schema: object_schema(serde_json::json!({ "agentId": { "type": "string" } }), &["agentId"]),
        version: None,
        is_dynamic: false,
    };
    let _ = registry.register(
        get_state_def,
        Arc::new(AgentGetStateTool::new(
            coordinator.clone(),
            config.tools.max_state_bytes,
            config.logging.redact_keys.clone(),
        )),
        logger,
    );

    let health_summary = HealthSummary {
        server_name: config.server.name.clone(),
        server_version: config.server.version.clone(),
        tools_registered: registry.list().len() + 1,
        max_concurrent_executions: config.resources.max_concurrent_executions as u64,
        max_payload_bytes: config.tools.max_payload_bytes,
    };
    let health_def = ToolDefinition {
        name: "health".to_string(),
        description: "Report server identity, configuration, and live resource telemetry.".to_string(),
        input_schema: object_schema(serde_json::json!({}), &[]),
        version: None,
        is_dynamic: false,
    };
    let _ = registry.register(health_def, Arc::new(HealthTool::new(health_summary, resources.clone())), logger);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_assembles_without_panicking() {
        let config = Config::default();
        let app = build(&config, Transport::Stdio);
        assert_eq!(app.coordinator.list_agents().len(), 0);
        assert_eq!(app.shutdown_timeout, Duration::from_millis(config.server.shutdown_timeout_ms));
    }
}
