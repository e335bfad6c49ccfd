//! Tracegate - End-to-End Trace Sampling Decisions
//!
//! This crate decides, for each incoming request, whether it should be
//! recorded for distributed tracing. Noisy endpoints are filtered out,
//! requests that arrive as part of an already-sampled upstream trace are
//! always traced, and everything else is rate limited per logical endpoint
//! so a busy endpoint cannot use up the sampling budget of quiet ones.

pub mod cli;
pub mod config;
pub mod error;
pub mod policy;
pub mod ratelimit;
