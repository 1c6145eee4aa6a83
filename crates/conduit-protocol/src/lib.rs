//! MCP wire types: JSON-RPC envelopes, tool definitions, and the
//! per-invocation tool context.

pub mod jsonrpc;
pub mod tool;

pub use jsonrpc::{ErrorObject, RawMessage, Response, ResponsePayload, JSONRPC_VERSION};
pub use tool::{name_pattern, validate_definition, DefinitionError, ToolContext, ToolDefinition, Transport};
