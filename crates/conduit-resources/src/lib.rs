//! Concurrency admission control, payload-size enforcement, and telemetry.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use conduit_error::{ErrorCode, StructuredError};

/// A held admission slot. Dropping it releases capacity back to the
/// semaphore — the mandatory release counterpart to [`ResourceManager::try_acquire_slot`].
/// The slot must be held until the handler settles (success, failure, or
/// timeout-and-handler-finishes), never released early just because the
/// caller has already been responded to.
pub struct Slot {
    _permit: OwnedSemaphorePermit,
    concurrent_executions: Arc<AtomicI64>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.concurrent_executions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Live, point-in-time resource telemetry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Telemetry {
    /// Approximate resident memory usage in bytes.
    pub memory_usage_bytes: u64,
    /// Rolling proxy for scheduler/event-loop delay, in milliseconds.
    pub event_loop_delay_ms: u64,
    /// Current number of held admission slots.
    pub concurrent_executions: u64,
    /// Configured semaphore capacity.
    pub max_concurrent_executions: u64,
}

/// Coarse health classification derived from [`Telemetry`] against
/// [`HealthThresholds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// All thresholds comfortably under limits.
    Healthy,
    /// At least one threshold is elevated but not critical.
    Degraded,
    /// At least one threshold is breached.
    Unhealthy,
}

/// Thresholds used to classify [`HealthStatus`] from [`Telemetry`].
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    /// Memory usage (bytes) at/above which status is `Degraded`.
    pub memory_degraded_bytes: u64,
    /// Memory usage (bytes) at/above which status is `Unhealthy`.
    pub memory_unhealthy_bytes: u64,
    /// Event-loop delay (ms) at/above which status is `Degraded`.
    pub delay_degraded_ms: u64,
    /// Event-loop delay (ms) at/above which status is `Unhealthy`.
    pub delay_unhealthy_ms: u64,
    /// Concurrency saturation ratio (0.0-1.0) at/above which status is
    /// `Degraded`.
    pub concurrency_degraded_ratio: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            memory_degraded_bytes: 512 * 1024 * 1024,
            memory_unhealthy_bytes: 1024 * 1024 * 1024,
            delay_degraded_ms: 250,
            delay_unhealthy_ms: 1000,
            concurrency_degraded_ratio: 0.9,
        }
    }
}

/// Owns the concurrency semaphore, the payload-size gate, and the
/// telemetry counters backing health classification.
pub struct ResourceManager {
    semaphore: Arc<Semaphore>,
    max_concurrent_executions: u64,
    max_payload_bytes: usize,
    thresholds: HealthThresholds,
    memory_usage_bytes: AtomicU64,
    event_loop_delay_ms: AtomicU64,
    concurrent_executions: Arc<AtomicI64>,
}

impl ResourceManager {
    /// Create a manager with the given capacity and payload limit.
    #[must_use]
    pub fn new(max_concurrent_executions: usize, max_payload_bytes: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent_executions)),
            max_concurrent_executions: max_concurrent_executions as u64,
            max_payload_bytes,
            thresholds: HealthThresholds::default(),
            memory_usage_bytes: AtomicU64::new(0),
            event_loop_delay_ms: AtomicU64::new(0),
            concurrent_executions: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Override the default health thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Non-blocking slot acquisition. Returns `RESOURCE_EXHAUSTED` when
    /// capacity is exhausted; never suspends.
    pub fn try_acquire_slot(&self) -> Result<Slot, StructuredError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                self.concurrent_executions.fetch_add(1, Ordering::SeqCst);
                Ok(Slot { _permit: permit, concurrent_executions: self.concurrent_executions.clone() })
            }
            Err(_) => Err(StructuredError::new(
                ErrorCode::ResourceExhausted,
                "no concurrency slots available",
            )),
        }
    }

    /// Validate that `value`'s canonical UTF-8 JSON encoding does not
    /// exceed `maxPayloadBytes`.
    pub fn validate_payload_size(&self, value: &Value) -> Result<(), StructuredError> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            StructuredError::new(ErrorCode::Internal, format!("failed to serialize payload: {e}"))
        })?;
        if bytes.len() > self.max_payload_bytes {
            return Err(StructuredError::new(
                ErrorCode::ResourceExhausted,
                format!(
                    "payload of {} bytes exceeds the {} byte limit",
                    bytes.len(),
                    self.max_payload_bytes
                ),
            ));
        }
        Ok(())
    }

    /// Record a fresh memory/event-loop-delay sample. Callers (e.g. a
    /// periodic health-tick) push samples in; this type does not sample
    /// itself, to stay allocation/syscall-free on the hot path.
    pub fn record_sample(&self, memory_usage_bytes: u64, event_loop_delay_ms: u64) {
        self.memory_usage_bytes.store(memory_usage_bytes, Ordering::Relaxed);
        self.event_loop_delay_ms.store(event_loop_delay_ms, Ordering::Relaxed);
    }

    /// Snapshot current telemetry.
    #[must_use]
    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            memory_usage_bytes: self.memory_usage_bytes.load(Ordering::Relaxed),
            event_loop_delay_ms: self.event_loop_delay_ms.load(Ordering::Relaxed),
            concurrent_executions: self.concurrent_executions.load(Ordering::SeqCst).max(0) as u64,
            max_concurrent_executions: self.max_concurrent_executions,
        }
    }

    /// Classify current telemetry against [`HealthThresholds`].
    #[must_use]
    pub fn health_status(&self) -> HealthStatus {
        let t = self.telemetry();
        let ratio = if t.max_concurrent_executions == 0 {
            0.0
        } else {
            t.concurrent_executions as f64 / t.max_concurrent_executions as f64
        };
        if t.memory_usage_bytes >= self.thresholds.memory_unhealthy_bytes
            || t.event_loop_delay_ms >= self.thresholds.delay_unhealthy_ms
        {
            return HealthStatus::Unhealthy;
        }
        if t.memory_usage_bytes >= self.thresholds.memory_degraded_bytes
            || t.event_loop_delay_ms >= self.thresholds.delay_degraded_ms
            || ratio >= self.thresholds.concurrency_degraded_ratio
        {
            return HealthStatus::Degraded;
        }
        HealthStatus::Healthy
    }
}
