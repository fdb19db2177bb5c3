use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// A token-bucket handle the core exposes but never itself consumes from —
/// admission against it is the enclosing scheduler's responsibility. Round and
/// QueueRound each hold one: a round-global limiter and one per registered queue.
pub trait RateLimiter: fmt::Debug + Send + Sync {
    fn capacity(&self) -> f64;

    /// Tokens available as of `as_of`, a reference time rather than wall clock, so
    /// that admission decisions taken against the same round are deterministic
    /// regardless of how much real time elapses while the round runs.
    fn tokens_available(&self, as_of: DateTime<Utc>) -> f64;

    /// Attempts to withdraw `cost` tokens as of `as_of`; `true` and debits the
    /// bucket on success, `false` and leaves it untouched otherwise.
    fn try_acquire(&self, cost: f64, as_of: DateTime<Utc>) -> bool;
}

/// Reference token-bucket implementation, refilling linearly against whatever
/// reference time it is queried with. Interior state is behind a `parking_lot`
/// mutex rather than an atomic, matching this codebase's preference for explicit
/// lock types over lock-free structures at this contention scale.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug)]
struct TokenBucketState {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_second: f64, as_of: DateTime<Utc>) -> Self {
        Self {
            capacity,
            refill_per_second,
            state: Mutex::new(TokenBucketState {
                tokens: capacity,
                last_refill: as_of,
            }),
        }
    }

    fn refill_locked(&self, state: &mut TokenBucketState, as_of: DateTime<Utc>) {
        let elapsed_ms = (as_of - state.last_refill).num_milliseconds();
        if elapsed_ms > 0 {
            let elapsed_seconds = elapsed_ms as f64 / 1000.0;
            state.tokens = (state.tokens + elapsed_seconds * self.refill_per_second).min(self.capacity);
            state.last_refill = as_of;
        }
    }
}

impl RateLimiter for TokenBucket {
    fn capacity(&self) -> f64 {
        self.capacity
    }

    fn tokens_available(&self, as_of: DateTime<Utc>) -> f64 {
        let mut state = self.state.lock();
        self.refill_locked(&mut state, as_of);
        state.tokens
    }

    fn try_acquire(&self, cost: f64, as_of: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        self.refill_locked(&mut state, as_of);
        if state.tokens >= cost {
            state.tokens -= cost;
            true
        } else {
            false
        }
    }
}

/// Produces limiter handles bound to a reference time; the concrete factory an
/// orchestrator wires up is an external collaborator, this trait only documents
/// the shape the core expects to be handed.
pub trait RateLimiterFactory: Send + Sync {
    fn create(
        &self,
        capacity: f64,
        refill_per_second: f64,
        as_of: DateTime<Utc>,
    ) -> std::sync::Arc<dyn RateLimiter>;
}

#[derive(Debug, Default)]
pub struct TokenBucketFactory;

impl RateLimiterFactory for TokenBucketFactory {
    fn create(
        &self,
        capacity: f64,
        refill_per_second: f64,
        as_of: DateTime<Utc>,
    ) -> std::sync::Arc<dyn RateLimiter> {
        std::sync::Arc::new(TokenBucket::new(capacity, refill_per_second, as_of))
    }
}
