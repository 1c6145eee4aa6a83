//! The agent coordinator: per-agent FIFO processing, parallel across
//! agents, with optional AACP wiring.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use conduit_aacp::{Envelope, Ledger, MessageType, SessionManager};
use conduit_core::{Clock, IdGenerator, Logger, SystemClock};
use conduit_error::StructuredError;
pub use memory::{MemoryAdapter, MessageSummary, NoopMemoryAdapter, RecordingMemoryAdapter};

/// An agent's callable implementation. Invoked once per queued message,
/// strictly in enqueue order, from that agent's single processor task.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// Handle one message, given the agent's own mutable state map.
    async fn handle(&self, message: Value, ctx: AgentContext) -> Result<Value, StructuredError>;
}

/// Per-invocation context handed to an [`AgentHandler`].
#[derive(Clone)]
pub struct AgentContext {
    /// This agent's id.
    pub agent_id: String,
    /// The agent's own mutable state map, shared across every invocation
    /// on this agent — safe to mutate without further locking since only
    /// this agent's serial processor ever touches it.
    pub state: Arc<DashMap<String, Value>>,
    /// Child logger carrying `agentId`, `messageType`, `sourceAgentId`.
    pub logger: Logger,
}

/// Optional, best-effort lifecycle callbacks. A hook that panics is
/// caught and logged at `warn`; it never corrupts the processor loop.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Fired when a message is dequeued, before the handler runs.
    pub on_message_received: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    /// Fired after a handler resolves successfully.
    pub on_message_completed: Option<Arc<dyn Fn(&str, &Value, u64) + Send + Sync>>,
    /// Fired after a handler resolves with an error.
    pub on_message_failed: Option<Arc<dyn Fn(&str, &StructuredError, u64) + Send + Sync>>,
    /// Fired after a successful handler run, with the agent's state map.
    pub on_state_change: Option<Arc<dyn Fn(&str, &DashMap<String, Value>) + Send + Sync>>,
}

fn call_hook<F: FnOnce() + std::panic::UnwindSafe>(logger: &Logger, name: &str, f: F) {
    if std::panic::catch_unwind(f).is_err() {
        let mut ctx = serde_json::Map::new();
        ctx.insert("hook".to_string(), Value::String(name.to_string()));
        logger.warn("lifecycle hook panicked; ignored", Some(&ctx));
    }
}

/// Errors from coordinator-level operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// An agent with this id is already registered.
    #[error("agent '{0}' is already registered")]
    Duplicate(String),
    /// No agent with this id is registered.
    #[error("agent '{0}' is not registered")]
    NotFound(String),
}

impl From<CoordinatorError> for StructuredError {
    fn from(e: CoordinatorError) -> Self {
        let code = match e {
            CoordinatorError::Duplicate(_) => conduit_error::ErrorCode::InvalidArgument,
            CoordinatorError::NotFound(_) => conduit_error::ErrorCode::NotFound,
        };
        StructuredError::new(code, e.to_string())
    }
}

struct QueueItem {
    message: Value,
    message_id: String,
    request_id: Option<String>,
    envelope: Option<Envelope>,
    source_agent_id: Option<String>,
    respond_to: oneshot::Sender<Result<Value, StructuredError>>,
}

struct AgentEntry {
    state: Arc<DashMap<String, Value>>,
    sender: mpsc::UnboundedSender<QueueItem>,
}

/// The AACP wiring a coordinator may optionally be constructed with.
#[derive(Clone)]
pub struct AacpIntegration {
    /// Assigns `seq`/`ack` and mints `messageId`/`requestId`.
    pub sessions: Arc<SessionManager>,
    /// Records outcomes for dedup and retry.
    pub ledger: Arc<Ledger>,
}

/// Registers agents, routes messages to their per-agent FIFO queues, and
/// (optionally) threads every send/dispatch through AACP.
pub struct Coordinator {
    agents: DashMap<String, AgentEntry>,
    logger: Logger,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    hooks: Hooks,
    aacp: Option<AacpIntegration>,
    memory: Arc<dyn MemoryAdapter>,
}

impl Coordinator {
    /// Create a coordinator with no AACP wiring, default (empty) hooks, and
    /// a no-op memory adapter.
    #[must_use]
    pub fn new(logger: Logger, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            agents: DashMap::new(),
            logger,
            ids,
            clock: Arc::new(SystemClock),
            hooks: Hooks::default(),
            aacp: None,
            memory: Arc::new(NoopMemoryAdapter),
        }
    }

    /// Attach AACP wiring: every `send_message` opens/reuses an ordered
    /// session and appends to the ledger; every dispatch acknowledges and
    /// marks completion/failure.
    #[must_use]
    pub fn with_aacp(mut self, aacp: AacpIntegration) -> Self {
        self.aacp = Some(aacp);
        self
    }

    /// Attach lifecycle hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Override the clock (tests only; production always uses the wall
    /// clock via [`SystemClock`]).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach a memory adapter; every dispatched message's summary is
    /// reported to it post-dispatch.
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn MemoryAdapter>) -> Self {
        self.memory = memory;
        self
    }

    /// Register `id` with `handler`, spawning its per-agent processor
    /// task. Duplicate ids are rejected and logged at `warn`.
    pub fn register_agent(&self, id: &str, handler: Arc<dyn AgentHandler>) -> Result<(), CoordinatorError> {
        if self.agents.contains_key(id) {
            let mut ctx = serde_json::Map::new();
            ctx.insert("agentId".to_string(), Value::String(id.to_string()));
            self.logger.warn("duplicate agent registration rejected", Some(&ctx));
            return Err(CoordinatorError::Duplicate(id.to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(DashMap::new());
        let processor_state = state.clone();
        let agent_id = id.to_string();
        let logger = self.logger.clone();
        let hooks = self.hooks.clone();
        let aacp = self.aacp.clone();
        let memory = self.memory.clone();

        tokio::spawn(run_processor(agent_id, handler, processor_state, receiver, logger, hooks, aacp, memory));

        self.agents.insert(id.to_string(), AgentEntry { state, sender });
        Ok(())
    }

    /// Unregister `id`. Returns whether an agent was found. Dropping the
    /// entry's sender closes its processor's channel, ending the task once
    /// any already-queued messages drain.
    pub fn unregister_agent(&self, id: &str) -> bool {
        self.agents.remove(id).is_some()
    }

    /// Enqueue `message` from `source` to `target`, returning a receiver
    /// that resolves once the agent's processor has handled it.
    pub fn send_message(
        &self,
        source: &str,
        target: &str,
        message: Value,
    ) -> Result<oneshot::Receiver<Result<Value, StructuredError>>, CoordinatorError> {
        let entry = self.agents.get(target).ok_or_else(|| CoordinatorError::NotFound(target.to_string()))?;

        let (message_id, request_id, envelope) = match &self.aacp {
            Some(aacp) => {
                let message_id =
                    aacp.sessions.send_message(source, target, message.clone(), MessageType::Request, None);
                let record = aacp.ledger.get_by_message_id(&message_id);
                let request_id = record.as_ref().and_then(|r| r.request_id.clone());
                let envelope = record.map(|r| r.envelope);
                (message_id, request_id, envelope)
            }
            None => (self.ids.next_id("msg"), None, None),
        };

        let (tx, rx) = oneshot::channel();
        let item = QueueItem { message, message_id, request_id, envelope, source_agent_id: Some(source.to_string()), respond_to: tx };
        entry
            .sender
            .send(item)
            .map_err(|_| CoordinatorError::NotFound(target.to_string()))?;
        Ok(rx)
    }

    /// Agent ids sorted lexicographically.
    #[must_use]
    pub fn list_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// The live state map for `id`, or `None` if unregistered.
    #[must_use]
    pub fn get_agent_state(&self, id: &str) -> Option<Arc<DashMap<String, Value>>> {
        self.agents.get(id).map(|e| e.state.clone())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_processor(
    agent_id: String,
    handler: Arc<dyn AgentHandler>,
    state: Arc<DashMap<String, Value>>,
    mut receiver: mpsc::UnboundedReceiver<QueueItem>,
    logger: Logger,
    hooks: Hooks,
    aacp: Option<AacpIntegration>,
    memory: Arc<dyn MemoryAdapter>,
) {
    while let Some(item) = receiver.recv().await {
        if let Some(on_received) = hooks.on_message_received.clone() {
            let agent_id = agent_id.clone();
            call_hook(&logger, "onMessageReceived", move || on_received(&agent_id));
        }

        let mut ctx_fields = serde_json::Map::new();
        ctx_fields.insert("agentId".to_string(), Value::String(agent_id.clone()));
        if let Some(source) = &item.source_agent_id {
            ctx_fields.insert("sourceAgentId".to_string(), Value::String(source.clone()));
        }
        let child_logger = logger.child(ctx_fields);
        let ctx = AgentContext { agent_id: agent_id.clone(), state: state.clone(), logger: child_logger };

        if let Some(aacp) = &aacp {
            if let Some(envelope) = &item.envelope {
                aacp.sessions.acknowledge_message(&envelope.source_agent_id, &envelope.target_agent_id, envelope.seq);
            }
        }

        let started = Utc::now();
        let result = handler.handle(item.message, ctx).await;
        let duration_ms = duration_ms_since(started);

        if let Some(aacp) = &aacp {
            if let Some(request_id) = &item.request_id {
                match &result {
                    Ok(value) => aacp.ledger.mark_completed(request_id, value.clone(), None),
                    Err(error) => aacp.ledger.mark_failed(request_id, error.clone()),
                }
            }
        }

        memory
            .record_message_summary(MessageSummary {
                agent_id: agent_id.clone(),
                message_id: item.message_id.clone(),
                request_id: item.request_id.clone(),
                succeeded: result.is_ok(),
                duration_ms,
                completed_at: Utc::now(),
            })
            .await;

        match &result {
            Ok(value) => {
                if let Some(on_completed) = hooks.on_message_completed.clone() {
                    let agent_id = agent_id.clone();
                    let value = value.clone();
                    call_hook(&logger, "onMessageCompleted", move || on_completed(&agent_id, &value, duration_ms));
                }
                if let Some(on_state_change) = hooks.on_state_change.clone() {
                    let agent_id = agent_id.clone();
                    let state = state.clone();
                    call_hook(&logger, "onStateChange", move || on_state_change(&agent_id, &state));
                }
            }
            Err(error) => {
                if let Some(on_failed) = hooks.on_message_failed.clone() {
                    let agent_id = agent_id.clone();
                    let error = error.clone();
                    call_hook(&logger, "onMessageFailed", move || on_failed(&agent_id, &error, duration_ms));
                }
            }
        }

        let _ = item.respond_to.send(result);
    }
}

fn duration_ms_since(started: DateTime<Utc>) -> u64 {
    (Utc::now() - started).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::DeterministicIdGenerator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder(Arc<tokio::sync::Mutex<Vec<Value>>>);
    #[async_trait]
    impl AgentHandler for Recorder {
        async fn handle(&self, message: Value, _ctx: AgentContext) -> Result<Value, StructuredError> {
            self.0.lock().await.push(message.clone());
            Ok(message)
        }
    }

    fn coordinator() -> Coordinator {
        Coordinator::new(Logger::stderr(), Arc::new(DeterministicIdGenerator::new("t")))
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let coord = coordinator();
        coord.register_agent("a1", Arc::new(Recorder(Arc::new(tokio::sync::Mutex::new(vec![]))))).unwrap();
        let err = coord.register_agent("a1", Arc::new(Recorder(Arc::new(tokio::sync::Mutex::new(vec![]))))).unwrap_err();
        assert!(matches!(err, CoordinatorError::Duplicate(_)));
    }

    #[tokio::test]
    async fn send_to_unregistered_agent_is_not_found() {
        let coord = coordinator();
        let err = coord.send_message("client", "ghost", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }

    #[tokio::test]
    async fn scenario_s5_agent_fifo_order() {
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let coord = coordinator();
        coord.register_agent("a1", Arc::new(Recorder(seen.clone()))).unwrap();

        let mut receivers = Vec::new();
        for i in 1..=5 {
            let rx = coord.send_message("client", "a1", serde_json::json!({"m": i})).unwrap();
            receivers.push(rx);
        }
        for rx in receivers {
            rx.await.unwrap().unwrap();
        }

        let order: Vec<i64> = seen.lock().await.iter().map(|v| v["m"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
    }

    struct Concurrency {
        current: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
    }
    #[async_trait]
    impl AgentHandler for Concurrency {
        async fn handle(&self, message: Value, _ctx: AgentContext) -> Result<Value, StructuredError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(message)
        }
    }

    #[tokio::test]
    async fn different_agents_process_in_parallel() {
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let coord = coordinator();
        for id in ["a1", "a2", "a3"] {
            coord
                .register_agent(id, Arc::new(Concurrency { current: current.clone(), max_seen: max_seen.clone() }))
                .unwrap();
        }
        let mut receivers = Vec::new();
        for id in ["a1", "a2", "a3"] {
            receivers.push(coord.send_message("client", id, serde_json::json!({})).unwrap());
        }
        for rx in receivers {
            rx.await.unwrap().unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn list_agents_is_lexicographic() {
        let coord = coordinator();
        for id in ["zeta", "alpha", "mid"] {
            coord.register_agent(id, Arc::new(Recorder(Arc::new(tokio::sync::Mutex::new(vec![]))))).unwrap();
        }
        assert_eq!(coord.list_agents(), vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn memory_adapter_receives_a_summary_per_dispatch() {
        let memory = Arc::new(RecordingMemoryAdapter::new());
        let coord = coordinator().with_memory(memory.clone());
        coord.register_agent("a1", Arc::new(Recorder(Arc::new(tokio::sync::Mutex::new(vec![]))))).unwrap();
        coord.send_message("client", "a1", serde_json::json!({"m": 1})).unwrap().await.unwrap().unwrap();
        let summaries = memory.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].agent_id, "a1");
        assert!(summaries[0].succeeded);
    }

    #[tokio::test]
    async fn unregister_reports_whether_found() {
        let coord = coordinator();
        coord.register_agent("a1", Arc::new(Recorder(Arc::new(tokio::sync::Mutex::new(vec![]))))).unwrap();
        assert!(coord.unregister_agent("a1"));
        assert!(!coord.unregister_agent("a1"));
    }
}
