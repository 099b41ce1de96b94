//! `sth install`: materialize a server binary for a given commit.
//!
//! Downloads from the configured URL template into the per-commit cache
//! under the working directory and marks it executable. A cached binary
//! short-circuits the download.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::info;

use sth_common::client::fetch_with_retry;
use sth_common::config::HarnessConfig;
use sth_common::errors::HarnessError;

/// Download retry shape for flaky artifact hosts.
const DOWNLOAD_RETRIES: u32 = 3;
const DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(5);

pub async fn run(config: &HarnessConfig, commit: &str) -> anyhow::Result<PathBuf> {
    let target = config.binary_cache_path(commit);
    if target.is_file() {
        info!(path = %target.display(), "Binary already cached");
        println!("{}", target.display());
        return Ok(target);
    }

    let Some(template) = &config.binary_url_template else {
        bail!("STH_BINARY_URL is not set; cannot install commit {commit}");
    };
    let url = template.replace("{commit}", commit);

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    info!(%url, "Downloading server binary");
    let http = reqwest::Client::new();
    let bytes = fetch_with_retry("binary download", DOWNLOAD_RETRIES, DOWNLOAD_RETRY_DELAY, || {
        let http = http.clone();
        let url = url.clone();
        async move {
            let response = http.get(&url).send().await.map_err(|e| {
                HarnessError::HttpTransport {
                    url: url.clone(),
                    reason: e.to_string(),
                }
            })?;
            let status = response.status();
            if !status.is_success() {
                return Err(HarnessError::HttpStatus {
                    url: url.clone(),
                    status: status.as_u16(),
                    body: String::new(),
                });
            }
            response.bytes().await.map_err(|e| HarnessError::HttpTransport {
                url,
                reason: format!("failed reading body: {e}"),
            })
        }
    })
    .await?;

    std::fs::write(&target, &bytes).with_context(|| format!("writing {}", target.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("marking {} executable", target.display()))?;
    }

    info!(path = %target.display(), bytes = bytes.len(), "Binary installed");
    println!("{}", target.display());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_install_without_template_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::for_tests(dir.path());
        let err = run(&config, "abc123").await.unwrap_err();
        assert!(err.to_string().contains("STH_BINARY_URL"));
    }

    #[tokio::test]
    async fn test_cached_binary_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::for_tests(dir.path());
        let cached = config.binary_cache_path("abc123");
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, b"#!/bin/sh\n").unwrap();

        // No URL template configured, so success proves no download ran.
        let path = run(&config, "abc123").await.unwrap();
        assert_eq!(path, cached);
    }
}
