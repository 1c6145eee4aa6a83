//! Per-(source,target) ordered sessions: seq assignment and cumulative ack
//! folding.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use conduit_core::{Clock, IdGenerator};

use crate::envelope::{Destination, Envelope, EnvelopeMetadata, MessageType};
use crate::ledger::{Ledger, MessageRecord};

/// Per-pair ordering and acknowledgment state.
struct PairState {
    next_seq: u64,
    last_ack: u64,
    /// Seqs received out of order, not yet folded into `last_ack`. Drained
    /// as the gap ahead of `last_ack` is filled.
    pending_acks: BTreeSet<u64>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

/// Maps `(sourceAgentId, targetAgentId)` to its ordering state, and is the
/// sole writer of envelope `seq`/`ack` fields.
pub struct SessionManager {
    sessions: DashMap<(String, String), Mutex<PairState>>,
    ledger: Arc<Ledger>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    /// Create a session manager writing through to `ledger`.
    #[must_use]
    pub fn new(ledger: Arc<Ledger>, ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { sessions: DashMap::new(), ledger, ids, clock }
    }

    fn pair<'a>(&'a self, source: &str, target: &str) -> dashmap::mapref::one::Ref<'a, (String, String), Mutex<PairState>> {
        let key = (source.to_string(), target.to_string());
        let now = self.clock.now();
        self.sessions.entry(key.clone()).or_insert_with(|| {
            Mutex::new(PairState {
                next_seq: 1,
                last_ack: 0,
                pending_acks: BTreeSet::new(),
                created_at: now,
                last_activity: now,
            })
        });
        self.sessions.get(&key).expect("just inserted")
    }

    /// Mint and append a new envelope from `source` to `target`, assigning
    /// the pair's next `seq` and (for `REQUEST`/`RESPONSE` without a caller
    /// supplied id) a fresh `requestId`. Returns the minted `messageId`.
    pub fn send_message(
        &self,
        source: &str,
        target: &str,
        payload: Value,
        message_type: MessageType,
        request_id: Option<String>,
    ) -> String {
        let pair = self.pair(source, target);
        let mut state = pair.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.last_activity = self.clock.now();
        drop(state);

        let message_id = self.ids.next_id("msg");
        let request_id = match message_type {
            MessageType::Request | MessageType::Response => {
                Some(request_id.unwrap_or_else(|| self.ids.next_id("req")))
            }
            MessageType::Event => None,
        };

        let envelope = Envelope {
            message_id: message_id.clone(),
            request_id,
            source_agent_id: source.to_string(),
            target_agent_id: target.to_string(),
            seq,
            ack: None,
            message_type,
            destination: Destination::Direct,
            timestamp: self.clock.now().to_rfc3339(),
            payload,
            metadata: EnvelopeMetadata::default(),
        };
        self.ledger.append(&envelope);
        message_id
    }

    /// Record receipt of `seq` for `(source, target)` and advance `lastAck`
    /// along the contiguous prefix of everything received so far. A seq
    /// that arrives ahead of a gap is remembered and folds in
    /// automatically once the gap is filled by a later call — `lastAck`
    /// never rolls back and never skips over a gap.
    pub fn acknowledge_message(&self, source: &str, target: &str, seq: u64) {
        let pair = self.pair(source, target);
        let mut state = pair.lock();
        if seq > state.last_ack {
            state.pending_acks.insert(seq);
        }
        while state.pending_acks.contains(&(state.last_ack + 1)) {
            let next = state.last_ack + 1;
            state.pending_acks.remove(&next);
            state.last_ack = next;
        }
        state.last_activity = self.clock.now();
    }

    /// Current `lastAck` for `(source, target)`, or `0` if the pair has
    /// never been used.
    #[must_use]
    pub fn last_ack(&self, source: &str, target: &str) -> u64 {
        self.sessions
            .get(&(source.to_string(), target.to_string()))
            .map(|p| p.lock().last_ack)
            .unwrap_or(0)
    }

    /// Messages between `(source, target)` that have not yet been
    /// acknowledged as completed, ordered by `seq`.
    #[must_use]
    pub fn unacknowledged_messages(&self, source: &str, target: &str) -> Vec<MessageRecord> {
        self.ledger.get_unacknowledged_messages(source, target)
    }
}
