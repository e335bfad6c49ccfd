//! Rate limiting logic and state management.

mod limiter;
mod registry;

pub use limiter::{RateLimiter, MAX_SAMPLES_PER_SECOND};
pub use registry::KeyedLimiterRegistry;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
