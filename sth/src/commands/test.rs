//! `sth test`: run the full phase sequence and report an exit code.

use std::sync::Arc;

use tracing::info;

use sth_common::config::HarnessConfig;
use sth_common::process::ProcessManager;

use crate::phases::PhaseRunner;
use crate::shutdown;

pub async fn run(config: HarnessConfig, no_secrets: bool) -> anyhow::Result<i32> {
    let manager = Arc::new(ProcessManager::new(config));
    shutdown::install_signal_handlers(manager.clone());

    let mut runner = PhaseRunner::new(manager, no_secrets);
    let exit_code = runner.run().await;

    for outcome in runner.outcomes() {
        info!(
            phase = %outcome.phase,
            exit_code = outcome.exit_code,
            "Phase result"
        );
    }
    info!(exit_code, "Test run complete");
    Ok(exit_code)
}
