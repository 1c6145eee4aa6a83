//! Identifier generation and clock abstraction.
//!
//! Two implementations behind one pair of traits: a production mode backed
//! by monotonic, time-ordered unique ids and the system wall clock, and a
//! deterministic mode backed by a seeded counter and a fixed instant. The
//! deterministic mode exists solely to make the test suite reproducible —
//! it is never wired into a running server.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// A source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Return the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// A source of unique identifiers, scoped by a caller-supplied prefix
/// (`"run"`, `"corr"`, `"msg"`, ...).
pub trait IdGenerator: Send + Sync {
    /// Mint a fresh identifier. Ids minted from the production generator
    /// are time-ordered and globally unique; ids from the deterministic
    /// generator are a predictable `prefix-N` sequence.
    fn next_id(&self, prefix: &str) -> String;
}

/// Wall-clock [`Clock`] backed by `chrono::Utc::now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Monotonic, time-ordered [`IdGenerator`] for production use.
///
/// Each id embeds the millisecond timestamp at which it was minted followed
/// by a process-local monotonic counter and a random suffix, so ids sort
/// lexicographically in roughly emission order while remaining globally
/// unique even when two ids are minted within the same millisecond.
#[derive(Debug, Default)]
pub struct MonotonicIdGenerator {
    counter: AtomicU64,
}

impl MonotonicIdGenerator {
    /// Create a new generator with its counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self { counter: AtomicU64::new(0) }
    }
}

impl IdGenerator for MonotonicIdGenerator {
    fn next_id(&self, prefix: &str) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let now_ms = Utc::now().timestamp_millis();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{prefix}-{now_ms:016x}-{seq:08x}-{}", &suffix[..8])
    }
}

/// A fixed instant in time, for deterministic tests.
#[derive(Debug, Clone)]
pub struct DeterministicClock {
    fixed: DateTime<Utc>,
}

impl DeterministicClock {
    /// Create a clock that always reports `fixed`.
    #[must_use]
    pub fn new(fixed: DateTime<Utc>) -> Self {
        Self { fixed }
    }

    /// Create a clock fixed at the Unix epoch, useful when the exact
    /// timestamp doesn't matter to a test.
    #[must_use]
    pub fn epoch() -> Self {
        Self { fixed: DateTime::<Utc>::UNIX_EPOCH }
    }
}

impl Clock for DeterministicClock {
    fn now(&self) -> DateTime<Utc> {
        self.fixed
    }
}

/// A seeded, sequential [`IdGenerator`] for deterministic tests.
///
/// Produces `{prefix}-{seed}-{n}` in strict emission order, starting at `n=0`.
#[derive(Debug)]
pub struct DeterministicIdGenerator {
    seed: String,
    counter: AtomicU64,
}

impl DeterministicIdGenerator {
    /// Create a generator seeded with `seed`; every id it produces embeds
    /// this seed so two generators never collide even if reused across
    /// tests.
    #[must_use]
    pub fn new(seed: impl Into<String>) -> Self {
        Self { seed: seed.into(), counter: AtomicU64::new(0) }
    }
}

impl IdGenerator for DeterministicIdGenerator {
    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{}-{n}", self.seed)
    }
}
