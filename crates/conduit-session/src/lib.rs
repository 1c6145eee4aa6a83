//! Session state machine and the pre-dispatch initialization gate.

use parking_lot::RwLock;
use serde_json::Value;

use conduit_error::{not_initialized_data, ErrorCode};
use conduit_protocol::Transport;

/// The session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Connected, no `initialize` received yet.
    Starting,
    /// `initialize` accepted, awaiting `initialized`.
    Initializing,
    /// Fully initialized; all methods are serviceable.
    Running,
    /// Connection closed. Terminal; `close` is idempotent into this state.
    Closed,
}

/// The method being dispatched, relevant only for transition validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The `initialize` request.
    Initialize,
    /// The `initialized` notification.
    Initialized,
    /// Session close (graceful or on disconnect).
    Close,
    /// Any other method — requires `Running`.
    Other,
}

/// Raised when a transition is attempted from a state that does not
/// allow it. Transitions are strictly ordered; any non-allowed one fails
/// rather than coercing toward a valid state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply transition {transition:?} from state {from:?}")]
pub struct InvalidTransition {
    /// State the session was in when the transition was attempted.
    pub from: State,
    /// The transition that was rejected.
    pub transition: Transition,
}

/// A process-wide singleton representing the single active connection —
/// this core is single-client only, one session per process.
pub struct Session {
    state: RwLock<State>,
    /// Stable id minted at connect, used as the correlation id fallback
    /// for errors raised before a request-level `_meta.correlationId` is
    /// available.
    pub connection_correlation_id: String,
    /// The transport this session is bound to.
    pub transport: Transport,
}

impl Session {
    /// Create a new session in `Starting`, bound to `transport`.
    #[must_use]
    pub fn new(connection_correlation_id: impl Into<String>, transport: Transport) -> Self {
        Self {
            state: RwLock::new(State::Starting),
            connection_correlation_id: connection_correlation_id.into(),
            transport,
        }
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        *self.state.read()
    }

    /// Apply `transition`, enforcing the session's state machine.
    /// `close` is idempotent from every state, including `Closed` itself.
    pub fn apply(&self, transition: Transition) -> Result<(), InvalidTransition> {
        let mut state = self.state.write();
        let next = match (*state, transition) {
            (State::Starting, Transition::Initialize) => State::Initializing,
            (State::Initializing, Transition::Initialized) => State::Running,
            (_, Transition::Close) => State::Closed,
            (from, transition) => return Err(InvalidTransition { from, transition }),
        };
        *state = next;
        Ok(())
    }

    /// Resolve the correlation id for an error: the request's
    /// `_meta.correlationId` if present, else the session's own id.
    #[must_use]
    pub fn correlation_id_for(&self, meta: Option<&Value>) -> String {
        meta.and_then(|m| m.get("correlationId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.connection_correlation_id.clone())
    }
}

/// Result of the initialization gate check.
pub struct GateRejection {
    /// JSON-RPC numeric code to return: always `-32002` for the gate
    /// itself.
    pub jsonrpc_code: i64,
    /// The `data` object: `{code, message, correlationId}`.
    pub data: Value,
}

/// Check whether `method` may be dispatched given the session's current
/// state. `initialize` and `initialized` are always permitted through (the
/// session state machine itself rejects them if out of order); every other
/// method requires `Running`.
pub fn check_gate(session: &Session, transition: Transition, meta: Option<&Value>) -> Result<(), GateRejection> {
    if matches!(transition, Transition::Initialize | Transition::Initialized) {
        return Ok(());
    }
    if session.state() == State::Running {
        return Ok(());
    }
    let correlation_id = session.correlation_id_for(meta);
    Err(GateRejection {
        jsonrpc_code: ErrorCode::NotInitialized.jsonrpc_code(),
        data: not_initialized_data(&correlation_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn happy_path_lifecycle() {
        let s = Session::new("conn-1", Transport::Stdio);
        assert_eq!(s.state(), State::Starting);
        s.apply(Transition::Initialize).unwrap();
        assert_eq!(s.state(), State::Initializing);
        s.apply(Transition::Initialized).unwrap();
        assert_eq!(s.state(), State::Running);
        s.apply(Transition::Close).unwrap();
        assert_eq!(s.state(), State::Closed);
    }

    #[test]
    fn close_is_idempotent_from_any_state() {
        let s = Session::new("conn-1", Transport::Stdio);
        s.apply(Transition::Close).unwrap();
        assert_eq!(s.state(), State::Closed);
        s.apply(Transition::Close).unwrap();
        assert_eq!(s.state(), State::Closed);
    }

    #[test]
    fn out_of_order_transitions_fail() {
        let s = Session::new("conn-1", Transport::Stdio);
        assert!(s.apply(Transition::Initialized).is_err());
        s.apply(Transition::Initialize).unwrap();
        assert!(s.apply(Transition::Initialize).is_err());
    }

    #[test]
    fn gate_rejects_other_methods_before_running() {
        let s = Session::new("conn-1", Transport::Stdio);
        let rejection = check_gate(&s, Transition::Other, None).unwrap_err();
        assert_eq!(rejection.jsonrpc_code, -32002);
        assert_eq!(rejection.data["code"], "NOT_INITIALIZED");
        assert_eq!(rejection.data["correlationId"], "conn-1");
    }

    #[test]
    fn gate_prefers_request_correlation_id() {
        let s = Session::new("conn-1", Transport::Stdio);
        let meta = serde_json::json!({ "correlationId": "req-corr" });
        let rejection = check_gate(&s, Transition::Other, Some(&meta)).unwrap_err();
        assert_eq!(rejection.data["correlationId"], "req-corr");
    }

    #[test]
    fn gate_allows_initialize_and_initialized_always() {
        let s = Session::new("conn-1", Transport::Stdio);
        assert!(check_gate(&s, Transition::Initialize, None).is_ok());
        assert!(check_gate(&s, Transition::Initialized, None).is_ok());
    }

    #[test]
    fn gate_passes_once_running() {
        let s = Session::new("conn-1", Transport::Stdio);
        s.apply(Transition::Initialize).unwrap();
        s.apply(Transition::Initialized).unwrap();
        assert!(check_gate(&s, Transition::Other, None).is_ok());
    }
}
