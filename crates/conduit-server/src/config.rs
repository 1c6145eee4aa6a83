//! Resolved server configuration.
//!
//! Only a resolved [`Config`] value is ever consumed here. Loading it from
//! env/file/CLI with `env > file > defaults` precedence is out of scope;
//! callers that need that wire it up themselves and hand this module the
//! result.

use conduit_tools::{AdminPolicy, AdminPolicyMode};

/// `server.*`.
#[derive(Debug, Clone)]
pub struct ServerSection {
    /// Advertised in the `initialize` response.
    pub name: String,
    /// Advertised in the `initialize` response.
    pub version: String,
    /// The MCP protocol version advertised in the `initialize` response.
    pub protocol_version: String,
    /// Grace period to drain in-flight handlers at close.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "conduit".to_string(),
            version: "0.1.0".to_string(),
            protocol_version: "2025-06-18".to_string(),
            shutdown_timeout_ms: 5_000,
        }
    }
}

/// `tools.*`.
#[derive(Debug, Clone)]
pub struct ToolsSection {
    /// Per-invocation timeout.
    pub default_timeout_ms: u64,
    /// Payload-size limit enforced by the resource manager.
    pub max_payload_bytes: usize,
    /// `agent/getState` serialized-response cap.
    pub max_state_bytes: usize,
    /// Must be true to permit `admin/registerTool`/`admin/unregisterTool`.
    pub admin_registration_enabled: bool,
    /// Admin policy decision.
    pub admin_policy: AdminPolicy,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_payload_bytes: 1_048_576,
            max_state_bytes: 65_536,
            admin_registration_enabled: false,
            admin_policy: AdminPolicy { mode: AdminPolicyMode::DenyAll, token_env_var: None },
        }
    }
}

/// `resources.*`.
#[derive(Debug, Clone)]
pub struct ResourcesSection {
    /// Concurrency semaphore capacity.
    pub max_concurrent_executions: usize,
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self { max_concurrent_executions: 16 }
    }
}

/// `logging.*`. `level` is carried for configuration-surface parity with
/// other runtimes but is not enforced as a minimum-severity filter — the
/// structured logger emits every call site unconditionally, matching its
/// "never drops an entry silently" design.
#[derive(Debug, Clone)]
pub struct LoggingSection {
    /// Nominal minimum severity (unenforced; see module docs).
    pub level: String,
    /// Case-insensitive context-key deny list, merged with the logger's
    /// built-in defaults.
    pub redact_keys: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            redact_keys: conduit_core::DEFAULT_REDACT_KEYS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// `security.*`.
#[derive(Debug, Clone)]
pub struct SecuritySection {
    /// Whether dynamic tool registration is permitted at all (distinct
    /// from `tools.admin_policy`, which governs *who* may use it).
    pub dynamic_registration_enabled: bool,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self { dynamic_registration_enabled: false }
    }
}

/// `aacp.*`.
#[derive(Debug, Clone)]
pub struct AacpSection {
    /// Default message/request expiry, if any.
    pub default_ttl_ms: Option<u64>,
}

impl Default for AacpSection {
    fn default() -> Self {
        Self { default_ttl_ms: None }
    }
}

/// The full resolved configuration tree.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// `server.*`
    pub server: ServerSection,
    /// `tools.*`
    pub tools: ToolsSection,
    /// `resources.*`
    pub resources: ResourcesSection,
    /// `logging.*`
    pub logging: LoggingSection,
    /// `security.*`
    pub security: SecuritySection,
    /// `aacp.*`
    pub aacp: AacpSection,
}
