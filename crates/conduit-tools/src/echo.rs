//! The `echo` tool type offered by `admin/registerTool`: returns its
//! arguments unchanged, for connectivity checks and registry smoke tests.

use async_trait::async_trait;
use serde_json::Value;

use conduit_error::StructuredError;
use conduit_protocol::ToolContext;
use conduit_registry::ToolHandler;

/// Returns `arguments` verbatim as the tool result.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(&self, arguments: Value, _ctx: ToolContext) -> Result<Value, StructuredError> {
        Ok(arguments)
    }
}
