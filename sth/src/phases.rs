//! Phase runner: sequences lifecycle phases against one or two topologies
//! and aggregates pass/fail into a process exit code.
//!
//! The sequence is linear and non-branching:
//!
//! ```text
//! CLEAN_DATA_DIRS
//!   -> SINGLE_FRESH -> SINGLE_RESTARTED -> SINGLE_SNAPSHOT
//!   -> MULTI_FRESH  -> MULTI_RESTARTED  -> MULTI_SNAPSHOT
//!   -> NO_PHASE
//!   -> SHUTDOWN (always)
//! ```
//!
//! A failing test subprocess marks the run failed and continues; only a
//! setup error (a node that never starts or never becomes healthy) aborts
//! the remaining phases of that stage. The other stage still runs, so one
//! broken phase cannot mask failures in later independent ones.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info, warn};

use sth_common::errors::{HarnessError, HarnessResult};
use sth_common::process::{ProcessManager, SetupOptions, StartOptions};
use sth_common::types::{NodeDescriptor, Phase, Topology};

/// Exit code reported for a test subprocess that exceeded its budget.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Budget for a node to become healthy after start/restart.
const HEALTH_BUDGET: Duration = Duration::from_secs(30);

/// Result of one executed phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub exit_code: i32,
}

/// Aggregate exit code: zero only if every phase's subprocess exited zero.
pub fn aggregate_exit_code(outcomes: &[PhaseOutcome], setup_failed: bool) -> i32 {
    if setup_failed || outcomes.iter().any(|o| o.exit_code != 0) {
        1
    } else {
        0
    }
}

/// Build the test-runner invocation tail: the phase name filter plus a
/// `--skip` per exclusion tag.
pub fn filter_args(phase: Phase, exclusions: &[String]) -> Vec<String> {
    // Rust test names are snake_case; the phase label is kebab-case.
    let mut args = vec![phase.label().replace('-', "_")];
    for tag in exclusions {
        args.push("--skip".to_string());
        args.push(tag.clone());
    }
    args
}

/// Sequences the phases against topologies owned by one `ProcessManager`.
pub struct PhaseRunner {
    manager: Arc<ProcessManager>,
    exclusions: Vec<String>,
    outcomes: Vec<PhaseOutcome>,
    setup_failed: bool,
}

impl PhaseRunner {
    pub fn new(manager: Arc<ProcessManager>, no_secrets: bool) -> Self {
        let exclusions = if no_secrets {
            vec!["secrets".to_string()]
        } else {
            Vec::new()
        };
        Self {
            manager,
            exclusions,
            outcomes: Vec::new(),
            setup_failed: false,
        }
    }

    /// Run every phase and return the process exit code.
    ///
    /// Shutdown is invoked exactly once, even when a stage aborts.
    pub async fn run(&mut self) -> i32 {
        if let Err(error) = self.clean_data_dirs() {
            error!(%error, "Failed to clean data directories; aborting run");
            let _ = self.manager.dispose_all().await;
            return 1;
        }

        if let Err(error) = self.run_single_stage().await {
            self.setup_failed = true;
            error!(%error, "Single-node stage aborted");
        }
        // The single topology never survives into the multi stage.
        if let Err(error) = self.manager.dispose_all().await {
            warn!(%error, "Single-node teardown failed");
        }

        if let Err(error) = self.run_multi_stage().await {
            self.setup_failed = true;
            error!(%error, "Multi-node stage aborted");
        }

        self.run_phase_tests(Phase::NoPhase).await;

        // SHUTDOWN: always, exactly once for whatever is still live.
        if let Err(error) = self.manager.dispose_all().await {
            warn!(%error, "Shutdown teardown failed");
            self.setup_failed = true;
        }

        aggregate_exit_code(&self.outcomes, self.setup_failed)
    }

    pub fn outcomes(&self) -> &[PhaseOutcome] {
        &self.outcomes
    }

    /// CLEAN_DATA_DIRS: wipe node data, snapshots, and the membership
    /// record. The binary cache under the work dir is left alone.
    fn clean_data_dirs(&self) -> HarnessResult<()> {
        let config = self.manager.config();
        let mut doomed: Vec<std::path::PathBuf> = (0..Topology::Cluster.node_count())
            .map(|index| config.work_dir.join(format!("node-{index}")))
            .collect();
        doomed.push(config.snapshot_dir.clone());
        for dir in doomed {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(HarnessError::fs(dir, e)),
            }
        }
        match std::fs::remove_file(config.membership_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(HarnessError::fs(config.membership_path(), e)),
        }
        std::fs::create_dir_all(&config.work_dir)
            .map_err(|e| HarnessError::fs(&config.work_dir, e))?;
        Ok(())
    }

    /// SINGLE_FRESH -> SINGLE_RESTARTED -> SINGLE_SNAPSHOT.
    async fn run_single_stage(&mut self) -> HarnessResult<()> {
        let nodes = self
            .manager
            .setup_nodes(Topology::Single, SetupOptions::default())
            .await?;
        let node = nodes[0].clone();

        self.manager
            .start_process(&node, StartOptions::default())
            .await?;
        self.wait_for_health(&nodes).await?;
        self.run_phase_tests(Phase::FreshSingle).await;

        self.manager.restart_process(node.api_port).await?;
        self.wait_for_health(&nodes).await?;
        self.run_phase_tests(Phase::RestartedSingle).await;

        let snapshot_dir = self.manager.config().snapshot_dir.join("single-v1");
        self.manager.snapshot(node.api_port, &snapshot_dir).await?;
        self.manager.restart_process(node.api_port).await?;
        self.wait_for_health(&nodes).await?;
        self.run_phase_tests(Phase::SnapshotSingle).await;

        Ok(())
    }

    /// MULTI_FRESH -> MULTI_RESTARTED -> MULTI_SNAPSHOT.
    ///
    /// The cluster is created once and carried through the restart and
    /// snapshot phases (restarted, never re-created) so persistence across
    /// the whole stage is what gets validated.
    async fn run_multi_stage(&mut self) -> HarnessResult<()> {
        let nodes = self
            .manager
            .setup_nodes(Topology::Cluster, SetupOptions::default())
            .await?;
        for node in &nodes {
            self.manager
                .start_process(node, StartOptions { multi_node: true })
                .await?;
        }
        self.wait_for_health(&nodes).await?;
        self.run_phase_tests(Phase::FreshMulti).await;

        self.restart_all(&nodes).await?;
        self.wait_for_health(&nodes).await?;
        self.run_phase_tests(Phase::RestartedMulti).await;

        // Snapshot one designated node, then bounce the whole cluster.
        let snapshot_dir = self.manager.config().snapshot_dir.join("multi-v1");
        self.manager
            .snapshot(nodes[0].api_port, &snapshot_dir)
            .await?;
        self.restart_all(&nodes).await?;
        self.wait_for_health(&nodes).await?;
        self.run_phase_tests(Phase::SnapshotMulti).await;

        Ok(())
    }

    async fn restart_all(&self, nodes: &[NodeDescriptor]) -> HarnessResult<()> {
        for node in nodes {
            self.manager.restart_process(node.api_port).await?;
        }
        Ok(())
    }

    /// Health waits are issued concurrently across the topology; the phase
    /// proceeds only once every node has resolved.
    async fn wait_for_health(&self, nodes: &[NodeDescriptor]) -> HarnessResult<()> {
        let mut waits = tokio::task::JoinSet::new();
        for node in nodes {
            let manager = self.manager.clone();
            let port = node.api_port;
            waits.spawn(async move { manager.wait_for_health(port, HEALTH_BUDGET).await });
        }
        while let Some(joined) = waits.join_next().await {
            joined.map_err(|e| HarnessError::Setup(format!("health wait task failed: {e}")))??;
        }
        Ok(())
    }

    /// Run the test subprocess for one phase; failures are recorded and
    /// never abort the run.
    async fn run_phase_tests(&mut self, phase: Phase) {
        info!(phase = %phase, "Running phase tests");
        let exit_code = match self.spawn_runner(phase).await {
            Ok(code) => code,
            Err(error) => {
                error!(phase = %phase, %error, "Test runner failed to start");
                1
            }
        };
        if exit_code != 0 {
            error!(
                "==============================================\n\
                 PHASE FAILED: {phase} (exit {exit_code})\n\
                 =============================================="
            );
        }
        self.outcomes.push(PhaseOutcome { phase, exit_code });
    }

    /// Spawn the configured test runner restricted to this phase's filter,
    /// bounded by the per-phase timeout.
    async fn spawn_runner(&self, phase: Phase) -> HarnessResult<i32> {
        let config = self.manager.config();
        let mut command = Command::new(&config.runner_program);
        command
            .args(&config.runner_args)
            .args(filter_args(phase, &self.exclusions))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| HarnessError::Spawn {
            binary: config.runner_program.clone().into(),
            reason: e.to_string(),
        })?;

        match timeout(config.phase_timeout, child.wait()).await {
            Ok(Ok(status)) => Ok(status.code().unwrap_or(1)),
            Ok(Err(e)) => Err(HarnessError::ProcessRuntime {
                port: 0,
                reason: format!("test runner wait failed: {e}"),
            }),
            Err(_) => {
                warn!(phase = %phase, budget = ?config.phase_timeout, "Phase timed out; killing runner");
                let _ = child.kill().await;
                Ok(TIMEOUT_EXIT_CODE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sth_common::config::HarnessConfig;

    #[test]
    fn test_filter_args_snake_cases_the_label() {
        assert_eq!(filter_args(Phase::FreshSingle, &[]), vec!["fresh_single"]);
        assert_eq!(
            filter_args(Phase::SnapshotMulti, &["secrets".to_string()]),
            vec!["snapshot_multi", "--skip", "secrets"]
        );
    }

    #[test]
    fn test_aggregate_exit_code() {
        let ok = PhaseOutcome {
            phase: Phase::FreshSingle,
            exit_code: 0,
        };
        let bad = PhaseOutcome {
            phase: Phase::RestartedSingle,
            exit_code: 101,
        };
        assert_eq!(aggregate_exit_code(&[ok.clone()], false), 0);
        assert_eq!(aggregate_exit_code(&[ok.clone(), bad], false), 1);
        assert_eq!(aggregate_exit_code(&[ok], true), 1);
        assert_eq!(aggregate_exit_code(&[], false), 0);
    }

    fn runner_with(program: &str, args: &[&str], dir: &std::path::Path) -> PhaseRunner {
        let mut config = HarnessConfig::for_tests(dir);
        config.runner_program = program.to_string();
        config.runner_args = args.iter().map(|s| s.to_string()).collect();
        PhaseRunner::new(Arc::new(ProcessManager::new(config)), false)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_phase_does_not_stop_later_phases() {
        let dir = tempfile::tempdir().unwrap();
        // `false` ignores the filter args and exits 1 for every phase.
        let mut runner = runner_with("false", &[], dir.path());

        runner.run_phase_tests(Phase::FreshSingle).await;
        runner.run_phase_tests(Phase::RestartedSingle).await;
        runner.run_phase_tests(Phase::NoPhase).await;

        assert_eq!(runner.outcomes().len(), 3);
        assert!(runner.outcomes().iter().all(|o| o.exit_code != 0));
        assert_eq!(aggregate_exit_code(runner.outcomes(), false), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_passing_phases_aggregate_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner_with("true", &[], dir.path());

        runner.run_phase_tests(Phase::FreshSingle).await;
        runner.run_phase_tests(Phase::NoPhase).await;

        assert_eq!(aggregate_exit_code(runner.outcomes(), false), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_runner_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner_with("/nonexistent/test-runner", &[], dir.path());

        runner.run_phase_tests(Phase::FreshSingle).await;
        assert_eq!(runner.outcomes()[0].exit_code, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_phase_timeout_kills_runner() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HarnessConfig::for_tests(dir.path());
        // The filter args land after the -c script and are ignored.
        config.runner_program = "sh".to_string();
        config.runner_args = vec!["-c".to_string(), "sleep 300".to_string()];
        config.phase_timeout = Duration::from_millis(200);
        let mut runner = PhaseRunner::new(Arc::new(ProcessManager::new(config)), false);

        let started = std::time::Instant::now();
        runner.run_phase_tests(Phase::NoPhase).await;
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(runner.outcomes()[0].exit_code, TIMEOUT_EXIT_CODE);
    }
}
