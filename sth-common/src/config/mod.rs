//! Configuration for a harness run.
//!
//! Everything is environment-driven (the harness runs unattended in CI);
//! `HarnessConfig::from_env` reads the full `STH_*` vocabulary in one pass
//! and reports every problem at once.

pub mod env;

use std::path::PathBuf;
use std::time::Duration;

pub use env::{EnvError, EnvParser};

use crate::errors::{HarnessError, HarnessResult};

/// Default API key injected into every spawned node and every request.
pub const DEFAULT_API_KEY: &str = "sth-test-key";

/// Base HTTP port for node 0; nodes are spaced 10 ports apart.
pub const DEFAULT_API_PORT: u16 = 8108;

/// Base peering port for node 0.
pub const DEFAULT_PEERING_PORT: u16 = 8107;

/// Wall-clock budget for one phase's test subprocess.
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(100);

/// Fully resolved configuration for one harness run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Path to the server binary under test.
    pub binary: PathBuf,
    /// Working directory holding node data/log dirs and the membership file.
    pub work_dir: PathBuf,
    /// Directory receiving snapshot output (per-phase subdirectories).
    pub snapshot_dir: PathBuf,
    /// Explicit bind/peering address override.
    pub bind_address: Option<String>,
    /// Preferred subnet prefix when discovering a non-loopback address in CI.
    pub subnet_prefix: String,
    /// API key passed to every node and sent with every request.
    pub api_key: String,
    /// OpenAI-compatible API key (real, or a placeholder for the mock proxy).
    pub openai_key: Option<String>,
    /// Outbound HTTP(S) proxy override for embedding-provider interception.
    pub proxy_url: Option<String>,
    /// Document import batch size.
    pub batch_size: u32,
    /// Duration of each benchmark load window.
    pub bench_duration: Duration,
    /// Test-runner program invoked per phase.
    pub runner_program: String,
    /// Base arguments for the test-runner; the phase filter is appended.
    pub runner_args: Vec<String>,
    /// Per-phase subprocess timeout.
    pub phase_timeout: Duration,
    /// Base HTTP port for node 0.
    pub base_api_port: u16,
    /// Base peering port for node 0.
    pub base_peering_port: u16,
    /// URL template for `install`, with `{commit}` substituted.
    pub binary_url_template: Option<String>,
    /// Whether we are running in an automated environment.
    pub ci: bool,
}

impl HarnessConfig {
    /// Read the full configuration from the environment.
    ///
    /// Collects every parse problem and returns them as one `Config` error
    /// so an operator can fix a broken CI environment in a single pass.
    pub fn from_env() -> HarnessResult<Self> {
        let mut parser = EnvParser::new();

        let work_dir = parser.get_path("WORK_DIR", std::env::temp_dir().join("sth"));
        let snapshot_dir = parser.get_path("SNAPSHOT_DIR", work_dir.join("snapshots"));

        let config = Self {
            binary: parser.get_path("BINARY", PathBuf::from("./searchd")),
            snapshot_dir,
            bind_address: parser.get_opt_string("BIND_ADDRESS"),
            subnet_prefix: parser.get_string("SUBNET_PREFIX", "192.168."),
            api_key: parser.get_string("API_KEY", DEFAULT_API_KEY),
            openai_key: parser.get_opt_string("OPENAI_KEY"),
            proxy_url: parser.get_opt_string("PROXY_URL"),
            batch_size: parser.get_u32_range("BATCH_SIZE", 100, 1, 10_000),
            bench_duration: parser.get_duration("BENCH_DURATION", Duration::from_secs(30)),
            runner_program: parser.get_string("RUNNER", "cargo"),
            // Phase tests are #[ignore]d so a bare `cargo test` never runs
            // them against a missing server; the runner opts back in.
            runner_args: parser.get_string_list(
                "RUNNER_ARGS",
                &["test", "--test", "phases", "--", "--ignored"],
            ),
            phase_timeout: parser.get_duration("PHASE_TIMEOUT", DEFAULT_PHASE_TIMEOUT),
            base_api_port: parser.get_port("API_PORT", DEFAULT_API_PORT),
            base_peering_port: parser.get_port("PEERING_PORT", DEFAULT_PEERING_PORT),
            binary_url_template: parser.get_opt_string("BINARY_URL"),
            ci: std::env::var("CI")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            work_dir,
        };

        if parser.has_errors() {
            let joined = parser
                .take_errors()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(HarnessError::Config(joined));
        }

        Ok(config)
    }

    /// Path of the cluster membership file under the working directory.
    pub fn membership_path(&self) -> PathBuf {
        self.work_dir.join("nodes")
    }

    /// Cached binary path for a given commit (used by `install`).
    pub fn binary_cache_path(&self, commit: &str) -> PathBuf {
        self.work_dir.join("bin").join(commit).join("searchd")
    }

    /// A fully defaulted configuration rooted at `work_dir`, independent of
    /// the process environment. Used by unit and integration tests.
    pub fn for_tests(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            binary: work_dir.join("searchd"),
            snapshot_dir: work_dir.join("snapshots"),
            bind_address: None,
            subnet_prefix: "192.168.".to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            openai_key: None,
            proxy_url: None,
            batch_size: 100,
            bench_duration: Duration::from_secs(30),
            runner_program: "cargo".to_string(),
            runner_args: vec![
                "test".into(),
                "--test".into(),
                "phases".into(),
                "--".into(),
                "--ignored".into(),
            ],
            phase_timeout: DEFAULT_PHASE_TIMEOUT,
            base_api_port: DEFAULT_API_PORT,
            base_peering_port: DEFAULT_PEERING_PORT,
            binary_url_template: None,
            ci: false,
            work_dir,
        }
    }
}
