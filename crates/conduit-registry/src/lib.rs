//! Tool registry: validated registration, precompiled schema validators,
//! lexicographic listing, duplicate rejection.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use conduit_core::Logger;
use conduit_error::{ErrorCode, StructuredError};
use conduit_protocol::{validate_definition, ToolContext, ToolDefinition};

/// A tool's callable implementation. Handlers observe `ctx.abort_signal`
/// cooperatively; the pipeline never forcibly terminates a handler.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool against validated `arguments`.
    async fn call(&self, arguments: Value, ctx: ToolContext) -> Result<Value, StructuredError>;
}

/// A definition plus its precompiled validator and handler, as stored in
/// the registry.
pub struct RegisteredTool {
    /// The tool's public definition.
    pub definition: ToolDefinition,
    /// Callable implementation.
    pub handler: Arc<dyn ToolHandler>,
    /// Schema validator compiled once at registration time — the `tools/call`
    /// path never compiles a schema.
    pub validator: jsonschema::Validator,
}

/// Errors from registry operations beyond structural definition validity
/// (see [`conduit_protocol::DefinitionError`] for those).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The definition failed structural validation.
    #[error(transparent)]
    Definition(#[from] conduit_protocol::DefinitionError),
    /// A tool with this name is already registered.
    #[error("tool '{0}' is already registered")]
    Duplicate(String),
    /// The schema failed to compile into a validator.
    #[error("schema for tool '{0}' failed to compile: {1}")]
    SchemaCompile(String, String),
}

impl From<RegistryError> for StructuredError {
    fn from(e: RegistryError) -> Self {
        StructuredError::new(ErrorCode::InvalidArgument, e.to_string())
    }
}

/// The process-wide tool registry.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<RegisteredTool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { tools: DashMap::new() }
    }

    /// Register a tool. Fails fast: structural validation, then duplicate
    /// check, then schema compilation, in that order — nothing is stored
    /// unless every step succeeds. Dynamic registrations log a `warn`
    /// entry naming the tool; static registrations are silent.
    pub fn register(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
        logger: &Logger,
    ) -> Result<(), RegistryError> {
        validate_definition(&definition)?;

        if self.tools.contains_key(&definition.name) {
            return Err(RegistryError::Duplicate(definition.name));
        }

        let validator = jsonschema::validator_for(&definition.input_schema)
            .map_err(|e| RegistryError::SchemaCompile(definition.name.clone(), e.to_string()))?;

        if definition.is_dynamic {
            let mut ctx = serde_json::Map::new();
            ctx.insert("toolName".to_string(), Value::String(definition.name.clone()));
            logger.warn("registered dynamic tool", Some(&ctx));
        }

        let name = definition.name.clone();
        self.tools.insert(name, Arc::new(RegisteredTool { definition, handler, validator }));
        Ok(())
    }

    /// Look up a tool by exact, case-sensitive name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.get(name).map(|e| e.value().clone())
    }

    /// Remove a tool by name. Returns whether a tool was found.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// All tool definitions, sorted lexicographically by name (stable,
    /// deterministic — `tools/list` must not reorder between calls).
    #[must_use]
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.iter().map(|e| e.value().definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}
