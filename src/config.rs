//! Configuration management for tracegate.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;

use crate::error::{Result, TracegateError};
use crate::policy::UrlPattern;

/// Prefix for environment variable overrides, e.g.
/// `TRACEGATE__POLICY__SAMPLING_RATE=5`.
const ENV_PREFIX: &str = "TRACEGATE";

/// Main configuration for tracegate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracegateConfig {
    /// Trace decision policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the end-to-end trace policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Request methods that are never traced
    #[serde(default)]
    pub ignore_methods: Vec<String>,

    /// Request URLs that are never traced
    #[serde(default = "default_ignore_urls")]
    pub ignore_urls: Vec<UrlPattern>,

    /// Traces per second per endpoint; 0 traces everything, negative
    /// disables rate-based tracing
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,

    /// Upper bound on the number of endpoints with their own limiter
    #[serde(default)]
    pub max_tracked_endpoints: Option<NonZeroUsize>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            ignore_methods: Vec::new(),
            ignore_urls: default_ignore_urls(),
            sampling_rate: default_sampling_rate(),
            max_tracked_endpoints: None,
        }
    }
}

fn default_ignore_urls() -> Vec<UrlPattern> {
    vec![UrlPattern::exact("/_ah/health")]
}

fn default_sampling_rate() -> f64 {
    10.0
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TracegateConfig {
    /// Load configuration from an optional file plus environment overrides.
    ///
    /// The file format follows its extension (YAML, TOML or JSON).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }

        let config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TracegateError::Config(format!("Failed to parse configuration: {}", e)))
    }
}

impl PolicyConfig {
    /// Load a bare policy section from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TracegateError::Config(format!("Failed to parse policy: {}", e)))
    }
}
