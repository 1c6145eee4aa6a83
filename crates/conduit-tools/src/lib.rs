//! Built-in tool handlers that sit on top of the registry/pipeline: the
//! agent façade, the health projection, and the admin policy gate.

pub mod admin_policy;
pub mod agent_tools;
pub mod echo;
pub mod health;

pub use admin_policy::{check_admin_policy, AdminPolicy, AdminPolicyMode};
pub use agent_tools::{AgentGetStateTool, AgentListTool, AgentSendMessageTool};
pub use echo::EchoTool;
pub use health::{HealthSummary, HealthTool};
