//! The admin policy gate in front of dynamic tool registration.

use conduit_error::{ErrorCode, StructuredError};
use conduit_protocol::Transport;

/// `adminPolicy.mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminPolicyMode {
    /// Reject every admin operation unconditionally.
    DenyAll,
    /// Accept only when the connection's transport is `stdio`.
    LocalStdioOnly,
    /// Defined by the wire protocol but declined in this version: no
    /// token-based admin auth yet.
    Token,
}

/// Resolved admin policy configuration.
#[derive(Debug, Clone)]
pub struct AdminPolicy {
    /// The enforcement mode.
    pub mode: AdminPolicyMode,
    /// Environment variable naming the expected token, relevant only to
    /// `Token` mode (unused while that mode is declined).
    pub token_env_var: Option<String>,
}

impl AdminPolicy {
    /// The default policy: deny every admin operation.
    #[must_use]
    pub fn deny_all() -> Self {
        Self { mode: AdminPolicyMode::DenyAll, token_env_var: None }
    }
}

/// Enforce `policy` against the connection's `transport`, before any
/// admin register/unregister method is dispatched.
pub fn check_admin_policy(policy: &AdminPolicy, transport: Transport) -> Result<(), StructuredError> {
    match policy.mode {
        AdminPolicyMode::DenyAll => {
            Err(StructuredError::new(ErrorCode::Unauthorized, "admin operations are disabled"))
        }
        AdminPolicyMode::LocalStdioOnly => {
            if transport == Transport::Stdio {
                Ok(())
            } else {
                Err(StructuredError::new(
                    ErrorCode::Unauthorized,
                    "admin operations are only permitted over the stdio transport",
                ))
            }
        }
        AdminPolicyMode::Token => Err(StructuredError::new(
            ErrorCode::Unauthorized,
            "token-based admin authorization is not supported in this version",
        )),
    }
}
