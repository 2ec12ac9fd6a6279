//! Error taxonomy for the monitoring pipeline.
//!
//! Faults fall into three recovery classes:
//! - **Fatal**: [`MonitorError::Config`]. The run aborts before any network call.
//! - **Retryable**: transport, feed-parse, response-parse, and verdict-count
//!   faults; retried under the backoff policy and escalated to batch
//!   quarantine (classification) or skipped (keyword fetch) on exhaustion.
//! - **Best-effort**: [`MonitorError::Delivery`]. Logged, recorded in the run
//!   log, never re-triggers classification.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed parse error: {0}")]
    FeedParse(String),

    #[error("unparseable classification response: {0}")]
    ResponseParse(String),

    #[error("classification returned {got} verdicts for {expected} articles")]
    VerdictCountMismatch { expected: usize, got: usize },

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
