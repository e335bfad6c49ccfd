//! Fixed-interval admission gate for a single key.

use std::sync::atomic::{AtomicI64, Ordering};
use tracing::trace;

/// Upper bound on admissions per second for any limiter.
pub const MAX_SAMPLES_PER_SECOND: f64 = 1000.0;

const MICROS_PER_MILLI: i64 = 1_000;
const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Admits at most one call per window.
///
/// The window is `1000 / rate` milliseconds. A call at or after the next
/// admission instant is admitted and pushes the next admission instant to
/// `now + window`; earlier calls are rejected without touching the state.
/// Idle time never builds up credit: after a long pause only a single call
/// is admitted immediately.
///
/// The next admission instant is advanced with a compare-and-swap, so
/// concurrent callers racing for the same window see exactly one winner.
#[derive(Debug)]
pub struct RateLimiter {
    /// Length of one window in microseconds
    window_micros: i64,
    /// Earliest instant (microseconds) at which the next call is admitted
    next_admission_micros: AtomicI64,
}

impl RateLimiter {
    /// Create a limiter whose first admission is available at `seed_millis`.
    ///
    /// `rate` is clamped to [`MAX_SAMPLES_PER_SECOND`]. Non-positive rates are
    /// not meaningful here; callers select an always/never policy for those
    /// before building a limiter.
    pub fn new(rate: f64, seed_millis: i64) -> Self {
        Self {
            window_micros: window_micros(rate),
            next_admission_micros: AtomicI64::new(seed_millis.saturating_mul(MICROS_PER_MILLI)),
        }
    }

    /// Decide whether a call at `now_millis` is admitted.
    pub fn should_trace(&self, now_millis: i64) -> bool {
        let now = now_millis.saturating_mul(MICROS_PER_MILLI);
        let mut next = self.next_admission_micros.load(Ordering::Acquire);

        loop {
            if now < next {
                trace!(now_millis, next_admission_micros = next, "Rejected inside window");
                return false;
            }

            match self.next_admission_micros.compare_exchange_weak(
                next,
                now.saturating_add(self.window_micros),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => next = current,
            }
        }
    }

    /// Length of one admission window in milliseconds.
    pub fn window_millis(&self) -> f64 {
        self.window_micros as f64 / MICROS_PER_MILLI as f64
    }

    /// Earliest instant, in milliseconds, at which a call will be admitted.
    pub fn next_admission_millis(&self) -> f64 {
        self.next_admission_micros.load(Ordering::Acquire) as f64 / MICROS_PER_MILLI as f64
    }
}

/// Window length for `rate` admissions per second, in microseconds.
fn window_micros(rate: f64) -> i64 {
    let rate = if rate.is_nan() {
        f64::MIN_POSITIVE
    } else {
        rate.clamp(f64::MIN_POSITIVE, MAX_SAMPLES_PER_SECOND)
    };
    // Float to int casts saturate, so tiny rates yield i64::MAX.
    (MICROS_PER_SECOND / rate).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_at_seed_is_admitted() {
        let limiter = RateLimiter::new(5.0, 1_000);
        assert!(limiter.should_trace(1_000));
    }

    #[test]
    fn test_call_before_seed_is_rejected() {
        let limiter = RateLimiter::new(5.0, 1_000);
        assert!(!limiter.should_trace(999));
        // Rejection leaves the schedule untouched
        assert_eq!(limiter.next_admission_millis(), 1_000.0);
    }

    #[test]
    fn test_same_instant_admits_once() {
        let limiter = RateLimiter::new(10.0, 0);
        assert!(limiter.should_trace(42));
        assert!(!limiter.should_trace(42));
    }

    #[test]
    fn test_window_from_rate() {
        assert_eq!(RateLimiter::new(2.0, 0).window_millis(), 500.0);
        assert_eq!(RateLimiter::new(1.0, 0).window_millis(), 1_000.0);
        assert_eq!(RateLimiter::new(0.5, 0).window_millis(), 2_000.0);
    }

    #[test]
    fn test_rate_is_clamped_to_maximum() {
        let limiter = RateLimiter::new(50_000.0, 0);
        assert_eq!(limiter.window_millis(), 1.0);

        let limiter = RateLimiter::new(f64::INFINITY, 0);
        assert_eq!(limiter.window_millis(), 1.0);
    }

    #[test]
    fn test_admission_advances_by_exactly_one_window() {
        let limiter = RateLimiter::new(4.0, 0);

        assert!(limiter.should_trace(10));
        assert_eq!(limiter.next_admission_millis(), 260.0);

        assert!(!limiter.should_trace(259));
        assert!(limiter.should_trace(260));
        assert_eq!(limiter.next_admission_millis(), 510.0);
    }

    #[test]
    fn test_idle_time_does_not_accumulate_credit() {
        let limiter = RateLimiter::new(10.0, 0);
        assert!(limiter.should_trace(0));

        // Long pause, then a burst at one instant
        assert!(limiter.should_trace(60_000));
        assert!(!limiter.should_trace(60_000));
        assert!(!limiter.should_trace(60_050));
    }

    #[test]
    fn test_fractional_window() {
        // 3/s gives a 333.333ms window
        let limiter = RateLimiter::new(3.0, 0);
        assert!(limiter.should_trace(0));
        assert!(!limiter.should_trace(333));
        assert!(limiter.should_trace(334));
    }

    #[test]
    fn test_admissions_bounded_in_any_interval() {
        let rate = 20.0;
        let window = 1000.0 / rate;
        let limiter = RateLimiter::new(rate, 0);

        let admitted: Vec<i64> = (0..5_000i64)
            .step_by(7)
            .filter(|&t| limiter.should_trace(t))
            .collect();

        let interval = 1_000i64;
        for &start in &admitted {
            let count = admitted
                .iter()
                .filter(|&&t| t >= start && t < start + interval)
                .count();
            let bound = (interval as f64 / window).ceil() as usize + 1;
            assert!(count <= bound, "{} admissions from {} exceeds {}", count, start, bound);
        }
    }

    #[test]
    fn test_concurrent_callers_single_winner() {
        let limiter = RateLimiter::new(1.0, 0);

        let admitted = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (0..100).filter(|_| limiter.should_trace(500)).count()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum::<usize>()
        });

        assert_eq!(admitted, 1);
    }
}
