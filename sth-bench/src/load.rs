//! Load generation against one live server node.
//!
//! Each (scenario, concurrency) pair runs a fixed-duration window of
//! concurrent request loops and yields a latency summary.

use std::time::{Duration, Instant};

use serde_json::json;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use sth_common::api::{CollectionSchema, FieldSchema, SearchQuery};
use sth_common::client::NodeClient;

use crate::error::{BenchError, BenchResult};
use crate::percentile::LatencySummary;
use crate::scenario::Scenario;

/// Failed requests tolerated before the window itself fails, as a
/// fraction of total requests.
const FAILURE_BUDGET: f64 = 0.05;

/// Runs load windows against a single node.
#[derive(Debug, Clone)]
pub struct LoadRunner {
    client: NodeClient,
    duration: Duration,
    warmup: Duration,
}

impl LoadRunner {
    pub fn new(client: NodeClient, duration: Duration) -> Self {
        Self {
            client,
            duration,
            warmup: Duration::from_secs(2),
        }
    }

    #[must_use]
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Create and seed the scenario's collection.
    ///
    /// Every tenth document contains the query term so searches always
    /// have hits to rank.
    pub async fn seed(&self, scenario: &Scenario, batch_size: u32) -> BenchResult<()> {
        let schema = CollectionSchema {
            name: scenario.collection.clone(),
            fields: vec![
                FieldSchema::new("company_name", "string"),
                FieldSchema::new("num_employees", "int32"),
                FieldSchema::new("country", "string").faceted(),
            ],
            default_sorting_field: None,
        };
        // A leftover collection from an aborted run is fine to replace.
        let _ = self.client.delete_collection(&scenario.collection).await;
        self.client.create_collection(&schema).await?;

        let documents: Vec<serde_json::Value> = (0..scenario.documents)
            .map(|i| {
                let name = if i % 10 == 0 {
                    format!("{} industries {i}", scenario.query)
                } else {
                    format!("company {i}")
                };
                json!({
                    "id": i.to_string(),
                    "company_name": name,
                    "num_employees": (i % 5000) as i64,
                    "country": if i % 2 == 0 { "US" } else { "DE" },
                })
            })
            .collect();
        self.client
            .import_documents(&scenario.collection, &documents, batch_size)
            .await?;
        info!(
            scenario = %scenario.name,
            documents = scenario.documents,
            "Scenario seeded"
        );
        Ok(())
    }

    /// Run one load window and summarize its latencies.
    pub async fn run_window(
        &self,
        scenario: &Scenario,
        concurrency: u32,
    ) -> BenchResult<LatencySummary> {
        if self.warmup > Duration::ZERO {
            self.request_loop(scenario, self.warmup).await;
        }

        let mut tasks = JoinSet::new();
        for worker in 0..concurrency {
            let runner = self.clone();
            let scenario = scenario.clone();
            let window = self.duration;
            tasks.spawn(async move {
                debug!(worker, scenario = %scenario.name, "Load worker started");
                runner.request_loop(&scenario, window).await
            });
        }

        let mut latencies = Vec::new();
        let mut failures = 0usize;
        while let Some(joined) = tasks.join_next().await {
            let (worker_latencies, worker_failures) = joined.map_err(|e| BenchError::Load {
                scenario: scenario.name.clone(),
                reason: format!("load worker panicked: {e}"),
            })?;
            latencies.extend(worker_latencies);
            failures += worker_failures;
        }

        let total = latencies.len() + failures;
        if total > 0 && (failures as f64) / (total as f64) > FAILURE_BUDGET {
            return Err(BenchError::Load {
                scenario: scenario.name.clone(),
                reason: format!("{failures}/{total} requests failed"),
            });
        }

        LatencySummary::from_samples(&latencies, failures, self.duration)
            .ok_or_else(|| BenchError::EmptySamples(scenario.name.clone()))
    }

    /// Issue requests back-to-back until the window closes.
    async fn request_loop(&self, scenario: &Scenario, window: Duration) -> (Vec<Duration>, usize) {
        let query = SearchQuery::new(&scenario.query, &scenario.query_by);
        let deadline = Instant::now() + window;
        let mut latencies = Vec::new();
        let mut failures = 0usize;

        while Instant::now() < deadline {
            let started = Instant::now();
            match self.client.search(&scenario.collection, &query).await {
                Ok(_) => latencies.push(started.elapsed()),
                Err(error) => {
                    warn!(scenario = %scenario.name, %error, "Load request failed");
                    failures += 1;
                }
            }
        }
        (latencies, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Scenario {
        Scenario {
            name: "keyword".into(),
            collection: "bench_companies".into(),
            query: "stark".into(),
            query_by: "company_name".into(),
            documents: 100,
        }
    }

    #[tokio::test]
    async fn test_window_against_dead_server_fails_on_budget() {
        // Nothing listens on this port: every request fails, so the
        // failure budget trips rather than producing an empty summary.
        let runner = LoadRunner::new(
            NodeClient::new("127.0.0.1", 1, "k"),
            Duration::from_millis(50),
        )
        .with_warmup(Duration::ZERO);

        let err = runner.run_window(&scenario(), 2).await.unwrap_err();
        assert!(matches!(err, BenchError::Load { .. }));
    }
}
