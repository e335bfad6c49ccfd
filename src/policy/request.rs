//! The unit of work a trace decision is made for.

use serde::{Deserialize, Serialize};

/// An incoming request or span start awaiting a trace decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// When the request started, in milliseconds
    pub timestamp: i64,
    /// Logical operation name (route, RPC method); `None` means unnamed
    #[serde(default)]
    pub endpoint_key: Option<String>,
    /// Trace options carried on the propagated trace context, if any
    #[serde(default)]
    pub trace_options: Option<u32>,
    /// Request method, consulted by URL/method filters
    #[serde(default)]
    pub method: String,
    /// Request URL, consulted by URL/method filters
    #[serde(default)]
    pub url: String,
}

impl DecisionRequest {
    /// Create an unnamed request at `timestamp` with no trace context.
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint_key: impl Into<String>) -> Self {
        self.endpoint_key = Some(endpoint_key.into());
        self
    }

    pub fn with_trace_options(mut self, trace_options: u32) -> Self {
        self.trace_options = Some(trace_options);
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Whether the request belongs to a trace already sampled upstream.
    pub fn is_sampled_upstream(&self) -> bool {
        matches!(self.trace_options, Some(options) if options != 0)
    }
}
