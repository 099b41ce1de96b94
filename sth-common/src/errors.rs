//! Error taxonomy for the harness orchestration core.
//!
//! Every expected failure mode carries its own variant so callers can
//! react per kind (retry an HTTP failure, abort a stage on a setup
//! failure) instead of string-matching messages.

use std::path::PathBuf;
use std::time::Duration;

/// Errors produced by topology setup, process lifecycle, and HTTP plumbing.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// No usable bind/peering address could be resolved.
    #[error("address resolution failed: {0}")]
    Address(String),

    /// A directory or file could not be created, removed, or read.
    #[error("filesystem failure at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The server binary is missing, not a file, or not executable.
    #[error("cannot spawn {binary}: {reason}")]
    Spawn { binary: PathBuf, reason: String },

    /// A spawned process failed at runtime (unexpected exit, OS error).
    #[error("process on port {port} failed: {reason}")]
    ProcessRuntime { port: u16, reason: String },

    /// The node answered but reported itself unhealthy.
    #[error("node on port {port} is unhealthy: {body}")]
    HealthCheck { port: u16, body: String },

    /// A network-level HTTP failure (connection refused, timeout, ...).
    #[error("request to {url} failed: {reason}")]
    HttpTransport { url: String, reason: String },

    /// The server answered with a non-ok status.
    #[error("request to {url} returned {status}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },

    /// A process is already registered on this port.
    #[error("port {0} already has a live process registered")]
    PortInUse(u16),

    /// No process is registered on this port.
    #[error("no process registered on port {0}")]
    UnknownPort(u16),

    /// An operation exceeded its wall-clock budget.
    #[error("timed out after {0:?}: {1}")]
    Timeout(Duration, String),

    /// Configuration was missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Topology setup failed before any test could run.
    #[error("setup failed: {0}")]
    Setup(String),

    /// Malformed response body for a typed endpoint.
    #[error("unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// A bounded retry loop ran out of attempts.
    #[error("{label} failed after {attempts} attempts, no retries remain: {last}")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        #[source]
        last: Box<HarnessError>,
    },
}

impl HarnessError {
    /// Whether a retry against the same node may succeed.
    ///
    /// Transport-level failures and non-ok statuses are retryable; setup,
    /// spawn, and configuration failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HttpTransport { .. } | Self::HttpStatus { .. } | Self::HealthCheck { .. }
        )
    }

    /// Shorthand for filesystem errors.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used across the orchestration core.
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(
            HarnessError::HttpTransport {
                url: "http://localhost:8108/health".into(),
                reason: "connection refused".into(),
            }
            .is_retryable()
        );
        assert!(
            HarnessError::HttpStatus {
                url: "http://localhost:8108/health".into(),
                status: 503,
                body: "{}".into(),
            }
            .is_retryable()
        );
        assert!(!HarnessError::PortInUse(8108).is_retryable());
        assert!(!HarnessError::Setup("missing work dir".into()).is_retryable());
        assert!(
            !HarnessError::Spawn {
                binary: PathBuf::from("/nonexistent"),
                reason: "not found".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_display_includes_port() {
        let err = HarnessError::HealthCheck {
            port: 8118,
            body: "{\"ok\":false}".into(),
        };
        assert!(err.to_string().contains("8118"));
    }
}
