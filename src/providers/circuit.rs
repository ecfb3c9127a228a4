//! Circuit Breaker & Retry (§4.6). The teacher has no true open/half-open
//! breaker; `keyvault-package/src/pool/swarm.rs::execute_with_failover` just
//! walks a fallback list. The three-state machine here is grounded on
//! `other_examples/.../llm-failover.rs`'s `ProviderState` (consecutive
//! failures plus a cooldown deadline), made explicit as closed/open/half-open.
//! Backoff uses a base-1s, cap-30s jittered schedule rather than the
//! teacher's `100ms * 2^attempt`.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

/// How a failed attempt should be treated by the retry loop. Adapters never
/// see this; the scheduler classifies the outer `reqwest`/HTTP outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying immediately on the same key (timeouts, 5xx, connect resets).
    Transient,
    /// The provider asked us to slow down; the rate limiter's cooldown owns this.
    RateLimited,
    /// Not worth retrying (401, 400, malformed response body).
    Fatal,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("circuit open for provider, request rejected")]
    CircuitOpen,
    #[error("exhausted retry attempts: {0}")]
    RetriesExhausted(String),
    /// Auth/model-not-found (§4.6): this (provider, model) pair is
    /// permanently unusable for the process lifetime, distinct from a
    /// retryable exhaustion so the caller can latch it off.
    #[error("fatal provider error: {0}")]
    Fatal(String),
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// One breaker per provider. `failure_threshold` consecutive failures trips
/// it open; after `reset_timeout` it allows a single half-open trial.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        Self {
            failure_threshold,
            reset_timeout: Duration::from_millis(reset_timeout_ms),
            inner: Mutex::new(Inner { state: State::Closed, consecutive_failures: 0, opened_at: None }),
        }
    }

    /// Returns true if a caller may attempt a dispatch right now. A half-open
    /// trial is consumed by flipping the breaker closed optimistically;
    /// `record_failure` reopens it if the trial fails.
    pub async fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::Closed => true,
            State::HalfOpen => true,
            State::Open => {
                let opened_at = inner.opened_at.expect("open state always has opened_at");
                if opened_at.elapsed() >= self.reset_timeout {
                    inner.state = State::HalfOpen;
                    debug!("circuit moved to half-open after reset timeout");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != State::Closed {
            debug!("circuit closed after successful trial");
        }
        inner.state = State::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;
        if inner.state == State::HalfOpen || inner.consecutive_failures >= self.failure_threshold {
            if inner.state != State::Open {
                warn!(failures = inner.consecutive_failures, "circuit opened");
            }
            inner.state = State::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    /// Snapshot for metrics emission (§4.9); does not mutate state.
    pub async fn state_label(&self) -> &'static str {
        match self.inner.lock().await.state {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half_open",
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = exp.min(BACKOFF_CAP);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4 + 1);
    capped + Duration::from_millis(jitter_ms)
}

/// Drive one task's dispatch attempts through the breaker and backoff
/// schedule. `attempt_fn` performs one HTTP round trip and classifies its
/// own outcome; the loop stops retrying on `ErrorClass::Fatal` or once
/// `max_attempts` is reached.
pub async fn dispatch_with_retry<F, Fut, T>(
    breaker: &CircuitBreaker,
    max_attempts: u32,
    mut attempt_fn: F,
) -> Result<T, DispatchError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, (ErrorClass, String)>>,
{
    let mut last_error = String::new();
    for attempt in 0..max_attempts {
        if !breaker.allow_request().await {
            return Err(DispatchError::CircuitOpen);
        }
        match attempt_fn(attempt).await {
            Ok(value) => {
                breaker.record_success().await;
                return Ok(value);
            }
            // auth/model-not-found: permanently unusable for this process,
            // but must not open the circuit, that would hide healthy
            // siblings sharing the same provider (§4.6).
            Err((ErrorClass::Fatal, msg)) => {
                return Err(DispatchError::Fatal(msg));
            }
            // rate-limited: the key pool's own cooldown already handles
            // backoff; retrying does not count toward the circuit's
            // failure threshold.
            Err((ErrorClass::RateLimited, msg)) => {
                last_error = msg;
                continue;
            }
            Err((_transient_or_unknown, msg)) => {
                breaker.record_failure().await;
                last_error = msg;
                if attempt + 1 < max_attempts {
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
            }
        }
    }
    Err(DispatchError::RetriesExhausted(last_error))
}
