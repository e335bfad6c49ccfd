//! Trace decision policies.
//!
//! Every policy answers one question for a [`DecisionRequest`]: should it be
//! traced? Policies compose by delegation. [`EndToEndPolicy`] chains a filter
//! predicate, the upstream-sampled short-circuit and a per-endpoint rate
//! stage.

mod end_to_end;
mod filter;
mod request;

pub use end_to_end::EndToEndPolicy;
pub use filter::{BuiltinFilter, BuiltinFilterOptions, TraceContextHeaderBehavior, UrlPattern};
pub use request::DecisionRequest;

use tracing::warn;

use crate::ratelimit::RateLimiter;

/// A predicate deciding whether a request is traced.
///
/// Implementations are called on request-handling threads and must not block.
pub trait TracePolicy: Send + Sync {
    /// Return `true` if the request should be traced.
    fn should_trace(&self, request: &DecisionRequest) -> bool;
}

impl<F> TracePolicy for F
where
    F: Fn(&DecisionRequest) -> bool + Send + Sync,
{
    fn should_trace(&self, request: &DecisionRequest) -> bool {
        self(request)
    }
}

/// Traces everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysTrace;

impl TracePolicy for AlwaysTrace {
    fn should_trace(&self, _request: &DecisionRequest) -> bool {
        true
    }
}

/// Traces nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverTrace;

impl TracePolicy for NeverTrace {
    fn should_trace(&self, _request: &DecisionRequest) -> bool {
        false
    }
}

impl TracePolicy for RateLimiter {
    fn should_trace(&self, request: &DecisionRequest) -> bool {
        RateLimiter::should_trace(self, request.timestamp)
    }
}

/// How a configured sampling rate is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingMode {
    /// A rate of zero: every request is sampled
    Always,
    /// A negative (or NaN) rate: rate-based sampling is disabled
    Never,
    /// A positive rate in admissions per second
    Limited(f64),
}

impl SamplingMode {
    /// Classify a configured sampling rate.
    pub fn from_rate(rate: f64) -> Self {
        if rate.is_nan() {
            warn!("Sampling rate is NaN, rate-based tracing disabled");
            SamplingMode::Never
        } else if rate == 0.0 {
            SamplingMode::Always
        } else if rate < 0.0 {
            SamplingMode::Never
        } else {
            SamplingMode::Limited(rate)
        }
    }

    /// Build the rate stage for this mode, using `limited` for positive rates.
    pub(crate) fn into_policy<P, F>(self, limited: F) -> Box<dyn TracePolicy>
    where
        P: TracePolicy + 'static,
        F: FnOnce(f64) -> P,
    {
        match self {
            SamplingMode::Always => Box::new(AlwaysTrace),
            SamplingMode::Never => Box::new(NeverTrace),
            SamplingMode::Limited(rate) => Box::new(limited(rate)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_mode_from_rate() {
        assert_eq!(SamplingMode::from_rate(0.0), SamplingMode::Always);
        assert_eq!(SamplingMode::from_rate(-0.0), SamplingMode::Always);
        assert_eq!(SamplingMode::from_rate(-1.0), SamplingMode::Never);
        assert_eq!(SamplingMode::from_rate(f64::NAN), SamplingMode::Never);
        assert_eq!(SamplingMode::from_rate(f64::NEG_INFINITY), SamplingMode::Never);
        assert_eq!(SamplingMode::from_rate(2.5), SamplingMode::Limited(2.5));
    }

    #[test]
    fn test_constant_policies() {
        let request = DecisionRequest::new(0);
        assert!(AlwaysTrace.should_trace(&request));
        assert!(!NeverTrace.should_trace(&request));
    }

    #[test]
    fn test_closure_is_a_policy() {
        let only_get = |request: &DecisionRequest| request.method == "GET";
        assert!(only_get.should_trace(&DecisionRequest::new(0).with_method("GET")));
        assert!(!only_get.should_trace(&DecisionRequest::new(0).with_method("POST")));
    }

    #[test]
    fn test_rate_limiter_policy_uses_timestamp() {
        let limiter = RateLimiter::new(1.0, 0);
        assert!(TracePolicy::should_trace(&limiter, &DecisionRequest::new(0)));
        assert!(!TracePolicy::should_trace(&limiter, &DecisionRequest::new(999)));
        assert!(TracePolicy::should_trace(&limiter, &DecisionRequest::new(1_000)));
    }

    #[test]
    fn test_into_policy() {
        let request = DecisionRequest::new(0);
        let always = SamplingMode::Always.into_policy(|rate| RateLimiter::new(rate, 0));
        let never = SamplingMode::Never.into_policy(|rate| RateLimiter::new(rate, 0));
        let limited = SamplingMode::Limited(1.0).into_policy(|rate| RateLimiter::new(rate, 0));

        assert!(always.should_trace(&request));
        assert!(always.should_trace(&request));
        assert!(!never.should_trace(&request));
        assert!(limited.should_trace(&request));
        assert!(!limited.should_trace(&request));
    }
}
