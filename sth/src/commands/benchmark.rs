//! `sth benchmark`: compare two binary versions and fail on regression.

use std::path::{Path, PathBuf};

use tracing::info;

use sth_bench::{BenchmarkPlan, Comparator, consolidated_failure, report};
use sth_common::config::HarnessConfig;

pub struct BenchmarkArgs {
    pub baseline: PathBuf,
    pub candidate: PathBuf,
    pub threshold: Option<f64>,
    pub plan: Option<PathBuf>,
    pub store: Option<PathBuf>,
}

pub async fn run(config: HarnessConfig, args: BenchmarkArgs) -> anyhow::Result<i32> {
    let mut plan = match &args.plan {
        Some(path) => BenchmarkPlan::load(path)?,
        None => BenchmarkPlan::default(),
    };
    if let Some(threshold) = args.threshold {
        plan.threshold_pct = threshold;
    }
    plan.validate()?;

    let comparator = Comparator::new(config, plan);
    let comparison = comparator
        .compare(&args.baseline, &args.candidate)
        .await?;

    println!("{}", report::render_table(&comparison));

    if let Some(store_path) = &args.store {
        persist(&comparison, store_path)?;
    }

    if let Some(failures) = consolidated_failure(&comparison) {
        eprintln!("benchmark failed:\n{failures}");
        return Ok(1);
    }
    info!("No regressions beyond threshold");
    Ok(0)
}

#[cfg(feature = "storage")]
fn persist(comparison: &sth_bench::ComparisonReport, path: &Path) -> anyhow::Result<()> {
    let mut store = sth_bench::storage::ResultStore::open(path)?;
    store.append(comparison)?;
    info!(path = %path.display(), "Benchmark rows stored");
    Ok(())
}

#[cfg(not(feature = "storage"))]
fn persist(_comparison: &sth_bench::ComparisonReport, path: &Path) -> anyhow::Result<()> {
    anyhow::bail!(
        "--store {} requires the 'storage' feature",
        path.display()
    )
}
