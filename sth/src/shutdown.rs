//! Signal-driven cleanup funnel.
//!
//! Interrupt and terminate both land in the same path: a best-effort,
//! time-bounded disposal of every live process, then exit. The bound
//! keeps a second, forceful signal from ever being necessary.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info, warn};

use sth_common::process::ProcessManager;

/// Overall budget for signal-triggered teardown.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(45);

/// Install SIGINT/SIGTERM handlers that tear down `manager` and exit 1.
pub fn install_signal_handlers(manager: Arc<ProcessManager>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Signal received; disposing all processes");
        match tokio::time::timeout(SHUTDOWN_BUDGET, manager.dispose_all()).await {
            Ok(Ok(())) => info!("Teardown complete"),
            Ok(Err(err)) => warn!(%err, "Teardown finished with failures"),
            Err(_) => error!("Teardown exceeded {SHUTDOWN_BUDGET:?}; exiting anyway"),
        }
        std::process::exit(1);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%err, "Cannot listen for SIGTERM; falling back to ctrl-c only");
            let _ = signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = signal::ctrl_c().await;
}
