//! Retry policy and the in-memory retransmission schedule.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use conduit_core::Clock;
use conduit_error::ErrorCode;

use crate::ledger::{MessageRecord, Status};

/// Retry policy knobs. `jitter_factor` isn't part of the documented
/// default set of fields, but it's exercised as an explicit parameter in
/// tests, so it lives here with `0.1` as this implementation's chosen
/// default.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retry attempts before a message is abandoned.
    pub max_attempts: u32,
    /// Base delay in milliseconds before jitter.
    pub base_delay_ms: u64,
    /// Upper bound on the unjittered delay.
    pub max_delay_ms: u64,
    /// Exponential growth factor applied per attempt.
    pub multiplier: f64,
    /// Symmetric jitter fraction applied to the capped delay.
    pub jitter_factor: f64,
    /// Error codes that make a `Failed` message eligible for retry.
    pub retryable_errors: Vec<ErrorCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
            retryable_errors: vec![ErrorCode::Timeout, ErrorCode::ResourceExhausted, ErrorCode::Internal],
        }
    }
}

/// A due date plus the number of times this message has been rescheduled.
#[derive(Debug, Clone, Copy)]
struct ScheduleEntry {
    scheduled_at: DateTime<Utc>,
    attempt: u32,
}

/// The in-memory retransmission schedule. Does not perform the retransmit
/// itself — callers drain [`Retransmitter::process_retries_once`] and
/// reuse the message's `requestId` while minting a fresh `messageId`.
pub struct Retransmitter {
    schedule: DashMap<String, ScheduleEntry>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Retransmitter {
    /// Create a retransmitter bound to `policy` and `clock`.
    #[must_use]
    pub fn new(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { schedule: DashMap::new(), policy, clock }
    }

    /// This retransmitter's policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Schedule `message_id` to become due in `delay_ms`. Re-scheduling an
    /// already-scheduled message increments its attempt counter.
    pub fn schedule_retry(&self, message_id: &str, delay_ms: u64) {
        let now = self.clock.now();
        let scheduled_at = now + chrono::Duration::milliseconds(delay_ms as i64);
        self.schedule
            .entry(message_id.to_string())
            .and_modify(|e| {
                e.scheduled_at = scheduled_at;
                e.attempt += 1;
            })
            .or_insert(ScheduleEntry { scheduled_at, attempt: 0 });
    }

    /// Remove `message_id` from the schedule, if present.
    pub fn cancel_retry(&self, message_id: &str) {
        self.schedule.remove(message_id);
    }

    /// Extract and return every `messageId` whose `scheduledAt` has passed.
    /// Due entries are removed from the schedule; the caller is
    /// responsible for re-scheduling if the retransmit itself fails again.
    pub fn process_retries_once(&self) -> Vec<String> {
        let now = self.clock.now();
        let due: Vec<String> = self
            .schedule
            .iter()
            .filter(|e| e.scheduled_at <= now)
            .map(|e| e.key().clone())
            .collect();
        for message_id in &due {
            self.schedule.remove(message_id);
        }
        due
    }

    /// Whether `record` should be retried: attempts remain, and for a
    /// `Failed` record the observed error is in the retryable set.
    #[must_use]
    pub fn should_retry(&self, record: &MessageRecord, error: Option<&ErrorCode>) -> bool {
        if record.retry_count >= self.policy.max_attempts {
            return false;
        }
        match record.status {
            Status::Unknown => true,
            Status::Failed => error.is_some_and(|code| self.policy.retryable_errors.contains(code)),
            Status::Completed => false,
        }
    }

    /// Compute the jittered backoff delay for `attempt` (0-indexed):
    /// exponential growth capped at `max_delay_ms`, then symmetric jitter.
    #[must_use]
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        backoff_delay_ms(&self.policy, attempt, fastrand::f64())
    }
}

/// Pure backoff computation, parameterized over the random draw so tests
/// can exercise both bounds deterministically.
fn backoff_delay_ms(policy: &RetryPolicy, attempt: u32, unit_random: f64) -> u64 {
    let capped = (policy.base_delay_ms as f64 * policy.multiplier.powi(attempt as i32)).min(policy.max_delay_ms as f64);
    let jitter = capped * policy.jitter_factor * (unit_random - 0.5) * 2.0;
    (capped + jitter).max(0.0).round() as u64
}
