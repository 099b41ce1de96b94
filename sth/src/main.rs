//! Search Test Harness CLI.
//!
//! Drives an external search-server binary through integration phases
//! (`test`), materializes binaries per commit (`install`), and compares
//! two versions' performance (`benchmark`). Exit code 0 only on full
//! success; any phase failure, regression, or setup error exits 1.

#![forbid(unsafe_code)]

mod commands;
mod phases;
mod shutdown;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use sth_common::config::HarnessConfig;

#[derive(Parser)]
#[command(name = "sth")]
#[command(author, version, about = "Search Test Harness - phased integration tests and benchmarks")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the server binary for a commit into the local cache
    Install {
        /// Commit hash identifying the binary build
        #[arg(long)]
        commit: String,
    },
    /// Run the phased integration suite against the configured binary
    Test {
        /// Exclude tests that depend on live third-party credentials
        #[arg(long)]
        no_secrets: bool,
    },
    /// Compare two binary versions' performance
    Benchmark {
        /// Baseline (historical) binary
        #[arg(long)]
        baseline: PathBuf,
        /// Candidate (current) binary
        #[arg(long)]
        candidate: PathBuf,
        /// Allowed p95 regression percentage (overrides the plan)
        #[arg(long)]
        threshold: Option<f64>,
        /// Benchmark plan TOML (defaults to the built-in plan)
        #[arg(long)]
        plan: Option<PathBuf>,
        /// SQLite file receiving the result time series
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = HarnessConfig::from_env()?;
    info!(
        binary = %config.binary.display(),
        work_dir = %config.work_dir.display(),
        ci = config.ci,
        "Harness configuration loaded"
    );

    let exit_code = match cli.command {
        Commands::Install { commit } => {
            commands::install::run(&config, &commit).await?;
            0
        }
        Commands::Test { no_secrets } => commands::test::run(config, no_secrets).await?,
        Commands::Benchmark {
            baseline,
            candidate,
            threshold,
            plan,
            store,
        } => {
            commands::benchmark::run(
                config,
                commands::benchmark::BenchmarkArgs {
                    baseline,
                    candidate,
                    threshold,
                    plan,
                    store,
                },
            )
            .await?
        }
    };

    std::process::exit(exit_code);
}
