//! Two-version performance comparison.
//!
//! Boots the baseline binary, runs every (scenario, concurrency) load
//! window, tears it down, repeats for the candidate, and diffs p95
//! latencies against the regression threshold. Regressions are collected
//! in full so the report lists every one, not just the first.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sth_common::config::HarnessConfig;
use sth_common::process::{ProcessManager, SetupOptions, StartOptions};
use sth_common::types::Topology;

use crate::error::{BenchError, BenchResult};
use crate::load::LoadRunner;
use crate::percentile::LatencySummary;
use crate::scenario::BenchmarkPlan;

/// How long each freshly booted binary gets to become healthy.
const BOOT_BUDGET: Duration = Duration::from_secs(30);

/// One row of the comparison: a (scenario, concurrency) pair across both
/// versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRow {
    pub scenario: String,
    pub concurrency: u32,
    pub baseline_p95_ms: f64,
    pub candidate_p95_ms: f64,
    pub delta_pct: f64,
    pub regressed: bool,
}

/// Full result of a comparison run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub started_at: DateTime<Utc>,
    pub threshold_pct: f64,
    pub rows: Vec<BenchmarkRow>,
}

impl ComparisonReport {
    pub fn regressions(&self) -> impl Iterator<Item = &BenchmarkRow> {
        self.rows.iter().filter(|row| row.regressed)
    }

    pub fn has_regressions(&self) -> bool {
        self.rows.iter().any(|row| row.regressed)
    }
}

/// Orchestrates both measurement passes and the diff.
pub struct Comparator {
    config: HarnessConfig,
    plan: BenchmarkPlan,
}

impl Comparator {
    pub fn new(config: HarnessConfig, plan: BenchmarkPlan) -> Self {
        Self { config, plan }
    }

    /// Measure both versions and diff their p95 latencies.
    pub async fn compare(&self, baseline: &Path, candidate: &Path) -> BenchResult<ComparisonReport> {
        let started_at = Utc::now();

        info!(binary = %baseline.display(), "Measuring baseline version");
        let baseline_summaries = self.measure_version(baseline, "baseline").await?;
        info!(binary = %candidate.display(), "Measuring candidate version");
        let candidate_summaries = self.measure_version(candidate, "candidate").await?;

        let mut rows = Vec::new();
        for scenario in &self.plan.scenarios {
            for &concurrency in &self.plan.concurrency {
                let key = (scenario.name.clone(), concurrency);
                let (Some(base), Some(cand)) = (
                    baseline_summaries.get(&key),
                    candidate_summaries.get(&key),
                ) else {
                    // A missing summary means the window errored and was
                    // already reported; skip the row rather than invent one.
                    continue;
                };
                let delta_pct = if base.p95_ms > 0.0 {
                    (cand.p95_ms - base.p95_ms) / base.p95_ms * 100.0
                } else {
                    0.0
                };
                rows.push(BenchmarkRow {
                    scenario: scenario.name.clone(),
                    concurrency,
                    baseline_p95_ms: base.p95_ms,
                    candidate_p95_ms: cand.p95_ms,
                    delta_pct,
                    regressed: delta_pct > self.plan.threshold_pct,
                });
            }
        }

        Ok(ComparisonReport {
            started_at,
            threshold_pct: self.plan.threshold_pct,
            rows,
        })
    }

    /// Boot one version, run every load window, tear everything down.
    ///
    /// Teardown happens even when a window fails; a window failure skips
    /// that row but does not abort the remaining windows.
    async fn measure_version(
        &self,
        binary: &Path,
        label: &str,
    ) -> BenchResult<HashMap<(String, u32), LatencySummary>> {
        let mut config = self.config.clone();
        config.binary = binary.to_path_buf();
        config.work_dir = self.config.work_dir.join(format!("bench-{label}"));
        let manager = ProcessManager::new(config);

        let nodes = manager
            .setup_nodes(Topology::Single, SetupOptions::default())
            .await?;
        let node = &nodes[0];
        manager.start_process(node, StartOptions::default()).await?;

        let result = self.run_all_windows(&manager, node.api_port).await;

        if let Err(error) = manager.dispose_all().await {
            warn!(%error, label, "Teardown after measurement failed");
        }
        result
    }

    async fn run_all_windows(
        &self,
        manager: &ProcessManager,
        port: u16,
    ) -> BenchResult<HashMap<(String, u32), LatencySummary>> {
        manager.wait_for_health(port, BOOT_BUDGET).await?;
        let client = manager.client_for(port).await?;

        let mut summaries = HashMap::new();
        for scenario in &self.plan.scenarios {
            let runner = LoadRunner::new(client.clone(), self.config.bench_duration);
            runner.seed(scenario, self.config.batch_size).await?;
            for &concurrency in &self.plan.concurrency {
                match runner.run_window(scenario, concurrency).await {
                    Ok(summary) => {
                        info!(
                            scenario = %scenario.name,
                            concurrency,
                            p95_ms = summary.p95_ms,
                            rps = summary.throughput_rps,
                            "Load window complete"
                        );
                        summaries.insert((scenario.name.clone(), concurrency), summary);
                    }
                    Err(error) => {
                        warn!(
                            scenario = %scenario.name,
                            concurrency,
                            %error,
                            "Load window failed; row will be skipped"
                        );
                    }
                }
            }
        }
        Ok(summaries)
    }
}

/// Build the consolidated failure message listing every regression.
pub fn consolidated_failure(report: &ComparisonReport) -> Option<String> {
    let failures: Vec<String> = report
        .regressions()
        .map(|row| {
            BenchError::Threshold {
                scenario: row.scenario.clone(),
                concurrency: row.concurrency,
                baseline_ms: row.baseline_p95_ms,
                candidate_ms: row.candidate_p95_ms,
                delta_pct: row.delta_pct,
                threshold_pct: report.threshold_pct,
            }
            .to_string()
        })
        .collect();
    if failures.is_empty() {
        None
    } else {
        Some(failures.join("\n"))
    }
}
