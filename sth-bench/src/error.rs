//! Benchmark error classification.
//!
//! One error type covering load and comparison failures, exposing retry
//! semantics for the benchmark retry policy.

use crate::retry::RetryableError;

/// Errors that can occur while running or comparing benchmarks.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("load generation failed in scenario '{scenario}': {reason}")]
    Load { scenario: String, reason: String },

    #[error("server lifecycle failed: {0}")]
    Lifecycle(#[from] sth_common::HarnessError),

    #[error("no latency samples recorded for scenario '{0}'")]
    EmptySamples(String),

    #[error("benchmark plan invalid: {0}")]
    Plan(String),

    #[error(
        "performance regression in '{scenario}' @ {concurrency}: \
         p95 {candidate_ms:.1}ms vs {baseline_ms:.1}ms ({delta_pct:+.1}%, threshold {threshold_pct:.1}%)"
    )]
    Threshold {
        scenario: String,
        concurrency: u32,
        baseline_ms: f64,
        candidate_ms: f64,
        delta_pct: f64,
        threshold_pct: f64,
    },

    #[cfg(feature = "storage")]
    #[error("result storage failed: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl BenchError {
    /// Whether rerunning the same phase may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Load { .. } => true,
            Self::Lifecycle(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}

impl RetryableError for BenchError {
    fn is_retryable(&self) -> bool {
        BenchError::is_retryable(self)
    }
}

/// Result alias for benchmark operations.
pub type BenchResult<T> = Result<T, BenchError>;
