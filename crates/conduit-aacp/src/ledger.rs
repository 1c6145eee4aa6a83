//! Append-only ledger: request/message records, dedup-on-append, and status
//! queries. Adapted from a hash-chained receipt store into a
//! requestId-keyed dedup table — this core has no need for tamper evidence,
//! only idempotent re-delivery.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

use conduit_core::Clock;
use conduit_error::StructuredError;

use crate::envelope::{Envelope, MessageType};

/// The three-way status every request and message record converges to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Settled successfully; eligible for dedup-by-cache on re-append.
    Completed,
    /// Settled with an error; eligible for retry per [`crate::retry::RetryPolicy`].
    Failed,
    /// In flight, or its outcome was never observed (e.g. a timeout with no
    /// terminal signal). Always retryable.
    Unknown,
}

/// A logical request, keyed by `requestId`, spanning every retry attempt
/// that shares it.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// The stable dedup key.
    pub request_id: String,
    /// Sending agent.
    pub source: String,
    /// Receiving agent.
    pub target: String,
    /// `REQUEST` or `RESPONSE` — the type of the envelope that created this
    /// record.
    pub message_type: MessageType,
    /// The payload of the envelope that created this record.
    pub payload: Value,
    /// Current status.
    pub status: Status,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// TTL expiry, if configured.
    pub expires_at: Option<DateTime<Utc>>,
    /// Opaque pointer to where the full result lives, for callers that
    /// store results outside the ledger.
    pub completion_ref: Option<String>,
    /// The cached result value, returned verbatim to a duplicate append
    /// once `status == Completed`.
    pub result: Option<Value>,
    /// The error recorded by [`Ledger::mark_failed`], if any.
    pub error: Option<StructuredError>,
}

/// A single transmission attempt, keyed by `messageId`.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// Unique per transmission attempt.
    pub message_id: String,
    /// The logical request this attempt belongs to, if any.
    pub request_id: Option<String>,
    /// The envelope as transmitted.
    pub envelope: Envelope,
    /// Current status, mirrored from the owning request record where one
    /// exists.
    pub status: Status,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// TTL expiry, if configured.
    pub expires_at: Option<DateTime<Utc>>,
    /// Number of retransmissions of this logical request observed so far.
    pub retry_count: u32,
    /// When the retransmitter should next attempt retry, if scheduled.
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Result of [`Ledger::append`].
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    /// Whether this envelope's `requestId` was already recorded.
    pub is_duplicate: bool,
    /// The cached result, present only when `isDuplicate` and the prior
    /// record settled `Completed`.
    pub cached_result: Option<Value>,
    /// The prior record's completion reference, present under the same
    /// condition as `cachedResult`.
    pub completion_ref: Option<String>,
    /// Whether the caller should actually execute the handler for this
    /// envelope.
    pub should_execute: bool,
}

/// The append-only ledger. Thread-safe; every operation is a
/// single sharded map access or a short-held sequence of them.
pub struct Ledger {
    messages: DashMap<String, MessageRecord>,
    requests: DashMap<String, RequestRecord>,
    clock: std::sync::Arc<dyn Clock>,
    default_ttl_ms: Option<u64>,
}

impl Ledger {
    /// Create an empty ledger. `default_ttl_ms` seeds `expiresAt` on new
    /// records when set.
    #[must_use]
    pub fn new(clock: std::sync::Arc<dyn Clock>, default_ttl_ms: Option<u64>) -> Self {
        Self {
            messages: DashMap::new(),
            requests: DashMap::new(),
            clock,
            default_ttl_ms,
        }
    }

    fn expiry(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.default_ttl_ms.map(|ms| from + chrono::Duration::milliseconds(ms as i64))
    }

    /// Append `envelope`, applying the dedup rules in the documented
    /// order. Never mutates `envelope`.
    pub fn append(&self, envelope: &Envelope) -> AppendOutcome {
        let now = self.clock.now();

        if let Some(request_id) = &envelope.request_id {
            if let Some(existing) = self.requests.get(request_id) {
                match existing.status {
                    Status::Completed => {
                        return AppendOutcome {
                            is_duplicate: true,
                            cached_result: existing.result.clone(),
                            completion_ref: existing.completion_ref.clone(),
                            should_execute: false,
                        };
                    }
                    Status::Unknown => {
                        return AppendOutcome {
                            is_duplicate: true,
                            cached_result: None,
                            completion_ref: None,
                            should_execute: false,
                        };
                    }
                    Status::Failed => {
                        // Falls through: a failed request is eligible for
                        // re-execution via a fresh message record.
                    }
                }
            } else {
                self.requests.insert(
                    request_id.clone(),
                    RequestRecord {
                        request_id: request_id.clone(),
                        source: envelope.source_agent_id.clone(),
                        target: envelope.target_agent_id.clone(),
                        message_type: envelope.message_type,
                        payload: envelope.payload.clone(),
                        status: Status::Unknown,
                        timestamp: now,
                        expires_at: self.expiry(now),
                        completion_ref: None,
                        result: None,
                        error: None,
                    },
                );
            }
        }

        self.messages.insert(
            envelope.message_id.clone(),
            MessageRecord {
                message_id: envelope.message_id.clone(),
                request_id: envelope.request_id.clone(),
                envelope: envelope.clone(),
                status: Status::Unknown,
                timestamp: now,
                expires_at: self.expiry(now),
                retry_count: 0,
                next_retry_at: None,
            },
        );

        AppendOutcome { is_duplicate: false, cached_result: None, completion_ref: None, should_execute: true }
    }

    /// Mark `requestId` (and every message record that shares it) as
    /// `Completed`, caching `result` for future duplicate appends. Updates
    /// the request record first, then its message records.
    pub fn mark_completed(&self, request_id: &str, result: Value, completion_ref: Option<String>) {
        if let Some(mut req) = self.requests.get_mut(request_id) {
            req.status = Status::Completed;
            req.result = Some(result);
            req.completion_ref = completion_ref;
        }
        for mut entry in self.messages.iter_mut() {
            if entry.request_id.as_deref() == Some(request_id) {
                entry.status = Status::Completed;
            }
        }
    }

    /// Mark `requestId` (and every message record that shares it) as
    /// `Failed`, recording `error`.
    pub fn mark_failed(&self, request_id: &str, error: StructuredError) {
        if let Some(mut req) = self.requests.get_mut(request_id) {
            req.status = Status::Failed;
            req.error = Some(error);
        }
        for mut entry in self.messages.iter_mut() {
            if entry.request_id.as_deref() == Some(request_id) {
                entry.status = Status::Failed;
            }
        }
    }

    /// Look up a message record by its transmission-attempt id.
    #[must_use]
    pub fn get_by_message_id(&self, message_id: &str) -> Option<MessageRecord> {
        self.messages.get(message_id).map(|e| e.value().clone())
    }

    /// Look up a request record by its stable dedup key.
    #[must_use]
    pub fn get_by_request_id(&self, request_id: &str) -> Option<RequestRecord> {
        self.requests.get(request_id).map(|e| e.value().clone())
    }

    /// Messages between `(source, target)` whose status is not yet
    /// `Completed`, ordered by `seq` ascending.
    #[must_use]
    pub fn get_unacknowledged_messages(&self, source: &str, target: &str) -> Vec<MessageRecord> {
        let mut out: Vec<MessageRecord> = self
            .messages
            .iter()
            .filter(|e| {
                e.envelope.source_agent_id == source
                    && e.envelope.target_agent_id == target
                    && !matches!(e.status, Status::Completed)
            })
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|m| m.envelope.seq);
        out
    }

    /// Message records matching `status`, optionally restricted to those
    /// created before `older_than`.
    #[must_use]
    pub fn query_messages_by_status(&self, status: Status, older_than: Option<DateTime<Utc>>) -> Vec<MessageRecord> {
        self.messages
            .iter()
            .filter(|e| e.status == status && older_than.map_or(true, |cutoff| e.timestamp < cutoff))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Request records not yet `Completed`, optionally restricted to those
    /// created before `older_than`.
    #[must_use]
    pub fn query_pending_requests(&self, older_than: Option<DateTime<Utc>>) -> Vec<RequestRecord> {
        self.requests
            .iter()
            .filter(|e| !matches!(e.status, Status::Completed) && older_than.map_or(true, |cutoff| e.timestamp < cutoff))
            .map(|e| e.value().clone())
            .collect()
    }
}
