//! Benchmark plan: scenarios, concurrency levels, and the regression
//! threshold, loaded from a TOML file or defaulted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};

/// One load scenario: a seeded collection and the query shape driven
/// against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Collection seeded before the load window.
    pub collection: String,
    /// Query string issued by every request loop.
    pub query: String,
    /// Fields searched.
    pub query_by: String,
    /// Documents seeded into the collection.
    #[serde(default = "default_documents")]
    pub documents: u32,
}

fn default_documents() -> u32 {
    1_000
}

/// The full benchmark plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkPlan {
    /// Candidate p95 may exceed baseline p95 by at most this much.
    #[serde(default = "default_threshold_pct")]
    pub threshold_pct: f64,
    /// Concurrency levels each scenario runs at.
    #[serde(default = "default_concurrency")]
    pub concurrency: Vec<u32>,
    #[serde(rename = "scenario")]
    pub scenarios: Vec<Scenario>,
}

fn default_threshold_pct() -> f64 {
    15.0
}

fn default_concurrency() -> Vec<u32> {
    vec![1, 10, 50]
}

impl Default for BenchmarkPlan {
    fn default() -> Self {
        Self {
            threshold_pct: default_threshold_pct(),
            concurrency: default_concurrency(),
            scenarios: vec![
                Scenario {
                    name: "keyword".to_string(),
                    collection: "bench_companies".to_string(),
                    query: "stark".to_string(),
                    query_by: "company_name".to_string(),
                    documents: default_documents(),
                },
                Scenario {
                    name: "filtered".to_string(),
                    collection: "bench_companies".to_string(),
                    query: "stark".to_string(),
                    query_by: "company_name".to_string(),
                    documents: default_documents(),
                },
            ],
        }
    }
}

impl BenchmarkPlan {
    /// Load a plan from a TOML file, validating it is runnable.
    pub fn load(path: &Path) -> BenchResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BenchError::Plan(format!("cannot read {}: {e}", path.display())))?;
        let plan: Self = toml::from_str(&raw)
            .map_err(|e| BenchError::Plan(format!("cannot parse {}: {e}", path.display())))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> BenchResult<()> {
        if self.scenarios.is_empty() {
            return Err(BenchError::Plan("no scenarios defined".to_string()));
        }
        if self.concurrency.is_empty() || self.concurrency.contains(&0) {
            return Err(BenchError::Plan(
                "concurrency levels must be non-empty and non-zero".to_string(),
            ));
        }
        if self.threshold_pct <= 0.0 {
            return Err(BenchError::Plan(
                "threshold_pct must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
