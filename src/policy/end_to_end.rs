//! The end-to-end decision pipeline.

use std::num::NonZeroUsize;

use tracing::{debug, info, trace};

use super::{BuiltinFilter, DecisionRequest, SamplingMode, TracePolicy};
use crate::config::PolicyConfig;
use crate::error::Result;
use crate::ratelimit::{now_millis, KeyedLimiterRegistry};

/// Decides whether a request is traced.
///
/// Stages run in a fixed order and the first conclusive stage wins:
///
/// 1. The filter predicate. A rejection ends the decision, so filtered
///    requests never consume rate limiter budget.
/// 2. Requests whose trace options mark them as sampled upstream are traced
///    unconditionally, so traces continue end to end.
/// 3. Everything else goes to the rate stage: a per-endpoint
///    [`KeyedLimiterRegistry`] for positive sampling rates, always-trace for
///    a rate of zero, never-trace for negative rates.
pub struct EndToEndPolicy {
    filter: Box<dyn TracePolicy>,
    rate_stage: Box<dyn TracePolicy>,
}

impl EndToEndPolicy {
    /// Build the policy from configuration, seeding limiters at the current time.
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        Self::from_config_at(config, now_millis())
    }

    /// Build the policy from configuration, seeding limiters at `epoch_millis`.
    ///
    /// The builtin filter is built from the ignore lists only; trace context
    /// handling and sampling belong to the later stages.
    pub fn from_config_at(config: &PolicyConfig, epoch_millis: i64) -> Result<Self> {
        let filter =
            BuiltinFilter::ignore_lists(config.ignore_methods.clone(), config.ignore_urls.clone())?;

        info!(
            ignore_methods = config.ignore_methods.len(),
            ignore_urls = config.ignore_urls.len(),
            sampling_rate = config.sampling_rate,
            max_tracked_endpoints = ?config.max_tracked_endpoints,
            "End-to-end trace policy configured"
        );

        Ok(Self::build(
            Box::new(filter),
            config.sampling_rate,
            config.max_tracked_endpoints,
            epoch_millis,
        ))
    }

    /// Build the policy around a caller-supplied filter predicate.
    pub fn with_filter<F>(filter: F, sampling_rate: f64, epoch_millis: i64) -> Self
    where
        F: TracePolicy + 'static,
    {
        Self::build(Box::new(filter), sampling_rate, None, epoch_millis)
    }

    fn build(
        filter: Box<dyn TracePolicy>,
        sampling_rate: f64,
        max_keys: Option<NonZeroUsize>,
        epoch_millis: i64,
    ) -> Self {
        let mode = SamplingMode::from_rate(sampling_rate);
        debug!(mode = ?mode, epoch_millis, "Selecting rate stage");

        let rate_stage = mode.into_policy(|rate| {
            let registry = KeyedLimiterRegistry::new(rate, epoch_millis);
            match max_keys {
                Some(max_keys) => registry.with_max_keys(max_keys),
                None => registry,
            }
        });

        Self { filter, rate_stage }
    }
}

impl TracePolicy for EndToEndPolicy {
    fn should_trace(&self, request: &DecisionRequest) -> bool {
        if !self.filter.should_trace(request) {
            trace!(url = %request.url, method = %request.method, "Filtered out");
            return false;
        }

        if request.is_sampled_upstream() {
            trace!(
                endpoint = ?request.endpoint_key,
                trace_options = ?request.trace_options,
                "Continuing upstream trace"
            );
            return true;
        }

        self.rate_stage.should_trace(request)
    }
}

impl std::fmt::Debug for EndToEndPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndToEndPolicy").finish_non_exhaustive()
    }
}
