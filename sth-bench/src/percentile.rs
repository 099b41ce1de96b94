//! Latency statistics over a load window's samples.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Percentile summary of one (scenario, concurrency) load window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub failures: usize,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    /// Successful requests per second over the window.
    pub throughput_rps: f64,
}

impl LatencySummary {
    /// Summarize `latencies` recorded over `window`. Returns `None` for an
    /// empty sample set; callers decide whether that is an error.
    pub fn from_samples(latencies: &[Duration], failures: usize, window: Duration) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }

        let mut sorted_ms: Vec<f64> = latencies
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        sorted_ms.sort_by(|a, b| a.partial_cmp(b).expect("latencies are finite"));

        let mean_ms = sorted_ms.iter().sum::<f64>() / sorted_ms.len() as f64;
        let window_secs = window.as_secs_f64();
        let throughput_rps = if window_secs > 0.0 {
            sorted_ms.len() as f64 / window_secs
        } else {
            0.0
        };

        Some(Self {
            samples: sorted_ms.len(),
            failures,
            p50_ms: nearest_rank(&sorted_ms, 50.0),
            p95_ms: nearest_rank(&sorted_ms, 95.0),
            p99_ms: nearest_rank(&sorted_ms, 99.0),
            max_ms: *sorted_ms.last().expect("non-empty"),
            mean_ms,
            throughput_rps,
        })
    }
}

/// Nearest-rank percentile over a sorted slice.
fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
