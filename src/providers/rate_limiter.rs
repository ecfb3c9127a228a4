//! Key Pool & Rate Limiter (§4.4), adapted from the teacher's
//! `keyvault-package/src/pool/rate_tracker.rs` sliding-window tracker.
//! The teacher's `RateTracker` answers "is there capacity right now?"; this
//! version answers "how long until there is?" and suspends the caller
//! until a key becomes available.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use zeroize::Zeroize;

use super::ProviderDescriptor;

/// A leased key, held for the duration of one outbound call. Dropping it
/// releases the provider's in-flight semaphore slot and zeroizes the key
/// material (§3 KeyState: "Zeroized on drop, no disk persistence of the
/// raw secret ever occurs").
pub struct KeyLease {
    pub key: String,
    _permit: OwnedSemaphorePermit,
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

pub struct RateLimiter {
    /// (key, next-dispatch-allowed instant), selection and update under one
    /// lock so racing callers serialize on the same key rather than both
    /// reading a stale "oldest" snapshot.
    state: Mutex<Vec<(String, Instant)>>,
    interval: Duration,
    retry_after: Duration,
    semaphore: Arc<Semaphore>,
}

impl RateLimiter {
    pub fn new(descriptor: &ProviderDescriptor) -> Self {
        let now = Instant::now();
        let state = descriptor.api_keys.iter().map(|k| (k.clone(), now)).collect();
        let rpm = descriptor.rpm.max(1) as u64;
        Self {
            state: Mutex::new(state),
            interval: Duration::from_millis(60_000 / rpm),
            retry_after: Duration::from_millis(descriptor.retry_after_ms),
            semaphore: Arc::new(Semaphore::new(descriptor.burst.max(1))),
        }
    }

    /// Choose the key whose next-dispatch-allowed instant is earliest,
    /// reserve its next slot, then suspend until that instant arrives.
    pub async fn acquire(&self) -> KeyLease {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore never closes");

        let (key, wait_until) = {
            let mut state = self.state.lock().await;
            let (idx, _) = state
                .iter()
                .enumerate()
                .min_by_key(|(_, (_, next_allowed))| *next_allowed)
                .expect("provider has at least one key");
            let now = Instant::now();
            let next_allowed = state[idx].1;
            state[idx].1 = next_allowed.max(now) + self.interval;
            (state[idx].0.clone(), next_allowed)
        };

        let now = Instant::now();
        if wait_until > now {
            tokio::time::sleep(wait_until - now).await;
        }

        KeyLease { key, _permit: permit }
    }

    /// Called when a provider returns a rate-limit error for `key` (§4.6):
    /// push that key's next-allowed slot back by `retry_after_ms`.
    pub async fn record_rate_limited(&self, key: &str) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.iter_mut().find(|(k, _)| k == key) {
            entry.1 = Instant::now().max(entry.1) + self.retry_after;
        }
    }
}
