//! Benchmark comparison for the Search Test Harness.
//!
//! Runs load windows against two versions of the server binary and diffs
//! percentile latencies, failing the run when a regression exceeds the
//! configured threshold.

pub mod compare;
pub mod error;
pub mod load;
pub mod percentile;
pub mod report;
pub mod retry;
pub mod scenario;
#[cfg(feature = "storage")]
pub mod storage;

pub use compare::{BenchmarkRow, Comparator, ComparisonReport, consolidated_failure};
pub use error::{BenchError, BenchResult};
pub use load::LoadRunner;
pub use percentile::LatencySummary;
pub use retry::{BenchRetryPolicy, RetryableError, run_with_retry};
pub use scenario::{BenchmarkPlan, Scenario};
