//! Per-endpoint limiter registry.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::limiter::{RateLimiter, MAX_SAMPLES_PER_SECOND};
use crate::policy::{DecisionRequest, TracePolicy};

/// Lazily creates one [`RateLimiter`] per endpoint key.
///
/// Every limiter created by the registry is seeded at the registry's epoch
/// rather than at the moment its key is first seen, so all keys run on the
/// same clock and a key that shows up late does not get a free admission for
/// being new. Requests without a key share a single default limiter.
///
/// This struct is thread-safe and can be shared across request handlers. The
/// key map is only locked long enough to find or insert a limiter.
pub struct KeyedLimiterRegistry {
    /// Admissions per second for every limiter, already clamped
    rate: f64,
    /// Instant (milliseconds) all keyed limiters are seeded at
    epoch_millis: i64,
    /// Limiters indexed by endpoint key
    limiters: Mutex<LruCache<String, Arc<RateLimiter>>>,
    /// Limiter for requests without an endpoint key
    default_limiter: RateLimiter,
}

impl KeyedLimiterRegistry {
    /// Create a registry whose epoch is `epoch_millis`.
    ///
    /// The key map is unbounded; see [`with_max_keys`](Self::with_max_keys).
    pub fn new(rate: f64, epoch_millis: i64) -> Self {
        let clamped = rate.min(MAX_SAMPLES_PER_SECOND);
        if clamped < rate {
            debug!(
                requested = rate,
                effective = clamped,
                "Sampling rate clamped to maximum"
            );
        }

        Self {
            rate: clamped,
            epoch_millis,
            limiters: Mutex::new(LruCache::unbounded()),
            default_limiter: RateLimiter::new(clamped, epoch_millis),
        }
    }

    /// Bound the number of tracked keys, evicting the least recently used.
    ///
    /// An evicted key that shows up again gets a fresh limiter seeded at the
    /// registry epoch.
    pub fn with_max_keys(self, max_keys: NonZeroUsize) -> Self {
        Self {
            limiters: Mutex::new(LruCache::new(max_keys)),
            ..self
        }
    }

    /// Decide whether a request for `key` at `now_millis` should be traced.
    pub fn should_trace(&self, key: Option<&str>, now_millis: i64) -> bool {
        let admitted = match key.filter(|k| !k.is_empty()) {
            Some(key) => self.limiter(key).should_trace(now_millis),
            None => self.default_limiter.should_trace(now_millis),
        };

        trace!(key = ?key, now_millis, admitted, "Keyed rate decision");
        admitted
    }

    /// Get or create the limiter for a non-empty `key`.
    fn limiter(&self, key: &str) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock();

        if let Some(limiter) = limiters.get(key) {
            return Arc::clone(limiter);
        }

        debug!(
            key = %key,
            rate = self.rate,
            epoch_millis = self.epoch_millis,
            "Creating new endpoint limiter"
        );
        let limiter = Arc::new(RateLimiter::new(self.rate, self.epoch_millis));
        if let Some((evicted, _)) = limiters.push(key.to_string(), Arc::clone(&limiter)) {
            debug!(key = %evicted, "Evicted least recently used endpoint limiter");
        }
        limiter
    }

    /// The shared limiter used for requests without a key.
    pub fn default_limiter(&self) -> &RateLimiter {
        &self.default_limiter
    }

    /// Effective admissions per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Instant all keyed limiters are seeded at.
    pub fn epoch_millis(&self) -> i64 {
        self.epoch_millis
    }

    /// Get the number of tracked endpoint keys.
    pub fn key_count(&self) -> usize {
        self.limiters.lock().len()
    }

    /// Whether a limiter currently exists for `key`.
    pub fn is_tracked(&self, key: &str) -> bool {
        self.limiters.lock().contains(key)
    }
}

impl TracePolicy for KeyedLimiterRegistry {
    fn should_trace(&self, request: &DecisionRequest) -> bool {
        KeyedLimiterRegistry::should_trace(self, request.endpoint_key.as_deref(), request.timestamp)
    }
}

impl std::fmt::Debug for KeyedLimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLimiterRegistry")
            .field("rate", &self.rate)
            .field("epoch_millis", &self.epoch_millis)
            .field("key_count", &self.key_count())
            .finish()
    }
}
