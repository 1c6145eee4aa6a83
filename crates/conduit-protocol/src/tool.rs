//! Tool definition and per-invocation context.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use conduit_core::Logger;

/// The transport a session is bound to. Only `Stdio` is trusted by the
/// `local_stdio_only` admin policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Standard input/output framing — the default and only trusted
    /// transport for local admin operations.
    Stdio,
    /// HTTP request/response framing.
    Http,
    /// Server-sent events framing.
    Sse,
}

impl Transport {
    /// Tag string as it appears in tool context and health reporting.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Sse => "sse",
        }
    }
}

/// A registered tool's immutable definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, matching [`NAME_PATTERN`]. Unique within a registry,
    /// case-sensitive.
    pub name: String,
    /// Human-readable description. Must be non-empty.
    pub description: String,
    /// JSON-Schema describing `arguments`. Root `type` must be `"object"`.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// Optional semantic version of this tool definition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Whether this tool was registered dynamically (via the admin
    /// surface) rather than at process startup.
    #[serde(rename = "isDynamic")]
    pub is_dynamic: bool,
}

/// Tool names must start with a letter or underscore and contain only
/// `[A-Za-z0-9_/\-.]` thereafter.
pub fn name_pattern() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_/\-.]*$").expect("valid name pattern"))
}

/// Reasons a [`ToolDefinition`] fails [`validate_definition`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    /// `name` is empty or fails [`name_pattern`].
    #[error("invalid tool name: {0:?}")]
    InvalidName(String),
    /// `description` is empty.
    #[error("tool description must not be empty")]
    EmptyDescription,
    /// `inputSchema` is not an object schema, or its root `type` is not
    /// exactly `"object"`.
    #[error("inputSchema root type must be \"object\"")]
    SchemaNotObjectType,
}

/// Pure structural check of a [`ToolDefinition`], independent of registry
/// state.
pub fn validate_definition(def: &ToolDefinition) -> Result<(), DefinitionError> {
    if def.name.is_empty() || !name_pattern().is_match(&def.name) {
        return Err(DefinitionError::InvalidName(def.name.clone()));
    }
    if def.description.is_empty() {
        return Err(DefinitionError::EmptyDescription);
    }
    match def.input_schema.get("type").and_then(Value::as_str) {
        Some("object") => Ok(()),
        _ => Err(DefinitionError::SchemaNotObjectType),
    }
}

/// Per-invocation value supplied to a tool handler.
#[derive(Clone)]
pub struct ToolContext {
    /// Id unique to this invocation.
    pub run_id: String,
    /// Id tying this invocation to its request/response/log trail.
    pub correlation_id: String,
    /// Child logger carrying `runId`/`correlationId` context.
    pub logger: Logger,
    /// Fires on timeout or connection close; handlers should observe it
    /// cooperatively.
    pub abort_signal: CancellationToken,
    /// The transport this invocation arrived over.
    pub transport: Transport,
}
