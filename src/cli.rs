//! Line-oriented decision front end used by the `tracegate` binary.
//!
//! Each input line is a JSON decision request; each output line is the
//! decision for it.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::Result;
use crate::policy::{DecisionRequest, TracePolicy};
use crate::ratelimit::now_millis;

/// A decision request as read from input.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestRecord {
    /// Milliseconds since the Unix epoch; the current time when absent
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default, alias = "endpoint")]
    pub endpoint_key: Option<String>,
    #[serde(default)]
    pub trace_options: Option<u32>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
}

impl RequestRecord {
    fn into_request(self) -> DecisionRequest {
        DecisionRequest {
            timestamp: self.timestamp.unwrap_or_else(now_millis),
            endpoint_key: self.endpoint_key,
            trace_options: self.trace_options,
            method: self.method,
            url: self.url,
        }
    }
}

/// A decision as written to output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: i64,
    pub endpoint: Option<String>,
    pub url: String,
    pub traced: bool,
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionStats {
    pub traced: u64,
    pub dropped: u64,
    /// Lines that could not be parsed
    pub skipped: u64,
}

/// Decide every request read from `input`, writing one decision per line.
///
/// Blank lines are ignored and malformed lines (bad JSON or bad UTF-8) are
/// logged and skipped. Stops at end of input or when `shutdown` resolves,
/// whichever comes first, and returns the counts gathered so far either way.
pub async fn run_decisions<R, W, S>(
    policy: &dyn TracePolicy,
    mut input: R,
    mut output: W,
    shutdown: S,
) -> Result<DecisionStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let mut stats = DecisionStats::default();
    let mut line = Vec::new();
    tokio::pin!(shutdown);

    loop {
        line.clear();
        let read = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping decisions");
                break;
            }
            read = input.read_until(b'\n', &mut line) => read?,
        };
        if read == 0 {
            break;
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let record: RequestRecord = match serde_json::from_slice(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Skipping malformed request");
                stats.skipped += 1;
                continue;
            }
        };

        let request = record.into_request();
        let traced = policy.should_trace(&request);
        if traced {
            stats.traced += 1;
        } else {
            stats.dropped += 1;
        }
        debug!(endpoint = ?request.endpoint_key, url = %request.url, traced, "Decision made");

        let decision = DecisionRecord {
            timestamp: request.timestamp,
            endpoint: request.endpoint_key,
            url: request.url,
            traced,
        };
        let mut encoded = serde_json::to_vec(&decision)?;
        encoded.push(b'\n');
        output.write_all(&encoded).await?;
    }

    output.flush().await?;
    Ok(stats)
}

/// Install the global tracing subscriber, logging to stderr.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    }
}
