//! Builtin method/URL ignore-list filter.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{DecisionRequest, SamplingMode, TracePolicy};
use crate::error::{Result, TracegateError};
use crate::ratelimit::{now_millis, RateLimiter};

/// How the builtin filter treats an incoming trace context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceContextHeaderBehavior {
    /// Reject requests whose context says "not sampled"; others pass
    #[default]
    Default,
    /// Only trace requests whose context says "sampled"
    Require,
    /// Never look at the trace context
    Ignore,
}

impl TraceContextHeaderBehavior {
    fn should_trace(self, trace_options: Option<u32>) -> bool {
        match self {
            TraceContextHeaderBehavior::Default => trace_options != Some(0),
            TraceContextHeaderBehavior::Require => matches!(trace_options, Some(o) if o != 0),
            TraceContextHeaderBehavior::Ignore => true,
        }
    }
}

/// An ignore-url entry as written in configuration.
///
/// A plain string matches the whole URL exactly; `{ regex: "..." }` matches
/// anywhere in the URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UrlPattern {
    Exact(String),
    Regex { regex: String },
}

impl UrlPattern {
    pub fn exact(url: impl Into<String>) -> Self {
        UrlPattern::Exact(url.into())
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        UrlPattern::Regex {
            regex: pattern.into(),
        }
    }
}

#[derive(Debug)]
enum UrlMatcher {
    Exact(String),
    Regex(Regex),
}

impl UrlMatcher {
    fn compile(pattern: &UrlPattern) -> Result<Self> {
        match pattern {
            UrlPattern::Exact(url) => Ok(UrlMatcher::Exact(url.clone())),
            UrlPattern::Regex { regex } => Regex::new(regex)
                .map(UrlMatcher::Regex)
                .map_err(|source| TracegateError::Pattern {
                    pattern: regex.clone(),
                    source,
                }),
        }
    }

    fn matches(&self, url: &str) -> bool {
        match self {
            UrlMatcher::Exact(candidate) => candidate == url,
            UrlMatcher::Regex(regex) => regex.is_match(url),
        }
    }
}

/// Options for [`BuiltinFilter`].
#[derive(Debug, Clone, Default)]
pub struct BuiltinFilterOptions {
    /// Methods that are never traced (case-insensitive)
    pub ignore_methods: Vec<String>,
    /// URLs that are never traced
    pub ignore_urls: Vec<UrlPattern>,
    /// Treatment of the incoming trace context
    pub context_header_behavior: TraceContextHeaderBehavior,
    /// Admissions per second; 0 traces everything, negative traces nothing
    pub sampling_rate: f64,
}

/// Filters requests by method and URL ignore lists, the incoming trace
/// context and a single global rate limiter.
///
/// Stages run in that order and the first rejection wins, so the limiter is
/// only consulted for requests that pass every other stage.
pub struct BuiltinFilter {
    ignore_methods: Vec<String>,
    ignore_urls: Vec<UrlMatcher>,
    context_header_behavior: TraceContextHeaderBehavior,
    sampler: Box<dyn TracePolicy>,
}

impl BuiltinFilter {
    /// Build a filter whose limiter is seeded at the current time.
    pub fn new(options: BuiltinFilterOptions) -> Result<Self> {
        Self::with_epoch(options, now_millis())
    }

    /// Build a filter whose limiter is seeded at `epoch_millis`.
    pub fn with_epoch(options: BuiltinFilterOptions, epoch_millis: i64) -> Result<Self> {
        let ignore_urls = options
            .ignore_urls
            .iter()
            .map(UrlMatcher::compile)
            .collect::<Result<Vec<_>>>()?;

        let sampler = SamplingMode::from_rate(options.sampling_rate)
            .into_policy(|rate| RateLimiter::new(rate, epoch_millis));

        Ok(Self {
            ignore_methods: options.ignore_methods,
            ignore_urls,
            context_header_behavior: options.context_header_behavior,
            sampler,
        })
    }

    /// Build a pure ignore-list filter: no context handling, no sampling.
    pub fn ignore_lists(ignore_methods: Vec<String>, ignore_urls: Vec<UrlPattern>) -> Result<Self> {
        Self::new(BuiltinFilterOptions {
            ignore_methods,
            ignore_urls,
            context_header_behavior: TraceContextHeaderBehavior::Ignore,
            sampling_rate: 0.0,
        })
    }

    fn url_allowed(&self, url: &str) -> bool {
        !self.ignore_urls.iter().any(|m| m.matches(url))
    }

    fn method_allowed(&self, method: &str) -> bool {
        !self
            .ignore_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }
}

impl TracePolicy for BuiltinFilter {
    fn should_trace(&self, request: &DecisionRequest) -> bool {
        if !self.url_allowed(&request.url) {
            trace!(url = %request.url, "Ignored URL");
            return false;
        }
        if !self.method_allowed(&request.method) {
            trace!(method = %request.method, "Ignored method");
            return false;
        }
        if !self.context_header_behavior.should_trace(request.trace_options) {
            trace!(trace_options = ?request.trace_options, "Rejected by trace context");
            return false;
        }
        self.sampler.should_trace(request)
    }
}

impl std::fmt::Debug for BuiltinFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinFilter")
            .field("ignore_methods", &self.ignore_methods)
            .field("ignore_urls", &self.ignore_urls)
            .field("context_header_behavior", &self.context_header_behavior)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, url: &str) -> DecisionRequest {
        DecisionRequest::new(0).with_method(method).with_url(url)
    }

    #[test]
    fn test_exact_url_ignored() {
        let filter = BuiltinFilter::ignore_lists(vec![], vec![UrlPattern::exact("/_ah/health")]).unwrap();

        assert!(!filter.should_trace(&request("GET", "/_ah/health")));
        // Exact strings match the whole URL only
        assert!(filter.should_trace(&request("GET", "/_ah/health/deep")));
        assert!(filter.should_trace(&request("GET", "/users")));
    }

    #[test]
    fn test_regex_url_ignored() {
        let filter =
            BuiltinFilter::ignore_lists(vec![], vec![UrlPattern::regex(r"^/static/.*\.css$")]).unwrap();

        assert!(!filter.should_trace(&request("GET", "/static/site.css")));
        assert!(filter.should_trace(&request("GET", "/static/site.js")));
    }

    #[test]
    fn test_method_ignored_case_insensitive() {
        let filter = BuiltinFilter::ignore_lists(vec!["options".to_string()], vec![]).unwrap();

        assert!(!filter.should_trace(&request("OPTIONS", "/users")));
        assert!(!filter.should_trace(&request("Options", "/users")));
        assert!(filter.should_trace(&request("GET", "/users")));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = BuiltinFilter::ignore_lists(vec![], vec![UrlPattern::regex("(unclosed")]).unwrap_err();
        assert!(matches!(err, TracegateError::Pattern { .. }));
    }

    #[test]
    fn test_context_header_behavior() {
        let none = None;
        let unsampled = Some(0);
        let sampled = Some(1);

        let default = TraceContextHeaderBehavior::Default;
        assert!(default.should_trace(none));
        assert!(!default.should_trace(unsampled));
        assert!(default.should_trace(sampled));

        let require = TraceContextHeaderBehavior::Require;
        assert!(!require.should_trace(none));
        assert!(!require.should_trace(unsampled));
        assert!(require.should_trace(sampled));

        let ignore = TraceContextHeaderBehavior::Ignore;
        assert!(ignore.should_trace(none));
        assert!(ignore.should_trace(unsampled));
        assert!(ignore.should_trace(sampled));
    }

    #[test]
    fn test_sampler_applies_after_ignore_lists() {
        let options = BuiltinFilterOptions {
            ignore_urls: vec![UrlPattern::exact("/ignored")],
            sampling_rate: 1.0,
            ..Default::default()
        };
        let filter = BuiltinFilter::with_epoch(options, 0).unwrap();

        // Ignored URLs do not consume the limiter
        assert!(!filter.should_trace(&request("GET", "/ignored")));
        assert!(filter.should_trace(&request("GET", "/users")));
        assert!(!filter.should_trace(&request("GET", "/users")));
        assert!(filter.should_trace(&DecisionRequest::new(1_000).with_url("/users")));
    }

    #[test]
    fn test_negative_sampling_rate_traces_nothing() {
        let options = BuiltinFilterOptions {
            sampling_rate: -1.0,
            ..Default::default()
        };
        let filter = BuiltinFilter::with_epoch(options, 0).unwrap();
        assert!(!filter.should_trace(&request("GET", "/users")));
    }

    #[test]
    fn test_url_pattern_deserialize() {
        let patterns: Vec<UrlPattern> =
            serde_yaml::from_str("- /_ah/health\n- regex: ^/internal/\n").unwrap();

        assert_eq!(
            patterns,
            vec![UrlPattern::exact("/_ah/health"), UrlPattern::regex("^/internal/")]
        );
    }
}
