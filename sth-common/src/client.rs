//! HTTP client layer: per-node requests, bounded retries, and the
//! best-effort cluster convergence wait.
//!
//! Tests write to one node and immediately read from another; without a
//! convergence wait, replication lag makes those reads flaky. The wait is
//! a bounded poll-then-proceed, not a guarantee: after the retry budget is
//! exhausted the request is issued regardless.

use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::{HarnessError, HarnessResult};

/// Header carrying the administrative API key.
pub const API_KEY_HEADER: &str = "X-SEARCH-API-KEY";

/// Convergence wait budget: attempts and the starting delay.
///
/// The delay grows by a factor of ten per round (10 ms, 100 ms, 1 s, 10 s).
/// This progression is reproduced from observed production behavior on
/// purpose; the worst-case total wait (~11.1 s) stays inside the phase
/// budget. Do not "fix" it into doubling.
pub const CONVERGENCE_ATTEMPTS: u32 = 4;
pub const CONVERGENCE_BASE_DELAY: Duration = Duration::from_millis(10);

/// Options for a single fetch.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: Method,
    pub body: Option<Value>,
    /// Caller headers; the API-key header is merged on top.
    pub headers: Vec<(String, String)>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            body: None,
            headers: Vec::new(),
        }
    }
}

impl FetchOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            headers: Vec::new(),
        }
    }

    pub fn delete() -> Self {
        Self {
            method: Method::DELETE,
            body: None,
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Replication progress reported by a node's status endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NodeStatus {
    pub committed_index: u64,
    #[serde(default)]
    pub state: Option<String>,
}

/// Client for one node's HTTP API.
#[derive(Debug, Clone)]
pub struct NodeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl NodeClient {
    pub fn new(address: &str, port: u16, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("http://{address}:{port}"),
            api_key: api_key.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue one request. Non-2xx statuses and transport failures map to
    /// distinct error variants so callers can tell them apart.
    pub async fn fetch(&self, path: &str, options: &FetchOptions) -> HarnessResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(options.method.clone(), &url);
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }
        // Merged last so a caller-supplied key never shadows ours.
        request = request.header(API_KEY_HEADER, &self.api_key);
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| HarnessError::HttpTransport {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| HarnessError::HttpTransport {
            url: url.clone(),
            reason: format!("failed reading body: {e}"),
        })?;

        if !status.is_success() {
            return Err(HarnessError::HttpStatus {
                url,
                status: status.as_u16(),
                body,
            });
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|source| HarnessError::Decode { url, source })
    }

    /// Fetch and decode into a typed response.
    pub async fn fetch_typed<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &FetchOptions,
    ) -> HarnessResult<T> {
        let value = self.fetch(path, options).await?;
        serde_json::from_value(value).map_err(|source| HarnessError::Decode {
            url: format!("{}{}", self.base_url, path),
            source,
        })
    }

    /// Raw body send for JSONL imports (not JSON-encoded).
    pub async fn fetch_raw_body(&self, path: &str, body: String) -> HarnessResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("Content-Type", "text/plain")
            .body(body)
            .send()
            .await
            .map_err(|e| HarnessError::HttpTransport {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| HarnessError::HttpTransport {
            url: url.clone(),
            reason: format!("failed reading body: {e}"),
        })?;
        if !status.is_success() {
            return Err(HarnessError::HttpStatus {
                url,
                status: status.as_u16(),
                body: text,
            });
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        // Import responses are JSONL; surface the raw text when they are.
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Replication status of this node.
    pub async fn status(&self) -> HarnessResult<NodeStatus> {
        self.fetch_typed("/status", &FetchOptions::get()).await
    }
}

/// Clients for every node of the current topology, plus the convergence
/// accommodation for clustered reads.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    nodes: Vec<NodeClient>,
}

impl ClusterClient {
    pub fn new(nodes: Vec<NodeClient>) -> Self {
        Self { nodes }
    }

    pub fn node(&self, index: usize) -> HarnessResult<&NodeClient> {
        self.nodes
            .get(index)
            .ok_or_else(|| HarnessError::Config(format!("no node with index {index}")))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Request against the fixed single-node port (node 0).
    pub async fn fetch_single_node(
        &self,
        path: &str,
        options: &FetchOptions,
    ) -> HarnessResult<Value> {
        self.node(0)?.fetch(path, options).await
    }

    /// Request against a cluster member, after a bounded wait for all
    /// members to report the same committed index.
    pub async fn fetch_multi_node(
        &self,
        node_index: usize,
        path: &str,
        options: &FetchOptions,
    ) -> HarnessResult<Value> {
        let converged = self.wait_for_convergence().await;
        if !converged {
            warn!(path, "Cluster did not converge within the retry budget; issuing request anyway");
        }
        self.node(node_index)?.fetch(path, options).await
    }

    /// Poll every member's status endpoint until the committed indexes
    /// agree or the budget runs out. Returns whether agreement was seen.
    pub async fn wait_for_convergence(&self) -> bool {
        if self.nodes.len() < 2 {
            return true;
        }

        let mut delay = CONVERGENCE_BASE_DELAY;
        for attempt in 1..=CONVERGENCE_ATTEMPTS {
            match self.committed_indexes().await {
                Ok(indexes) => {
                    let first = indexes[0];
                    if indexes.iter().all(|&i| i == first) {
                        debug!(attempt, committed_index = first, "Cluster converged");
                        return true;
                    }
                    debug!(attempt, ?indexes, "Cluster members disagree on committed index");
                }
                Err(error) => {
                    debug!(attempt, %error, "Status poll failed during convergence wait");
                }
            }
            sleep(delay).await;
            delay *= 10;
        }
        false
    }

    /// Poll every member's status concurrently (one task per node).
    async fn committed_indexes(&self) -> HarnessResult<Vec<u64>> {
        let handles: Vec<_> = self
            .nodes
            .iter()
            .cloned()
            .map(|node| tokio::spawn(async move { node.status().await }))
            .collect();

        let mut indexes = Vec::with_capacity(handles.len());
        for handle in handles {
            let status = handle.await.map_err(|join_error| {
                HarnessError::HttpTransport {
                    url: String::new(),
                    reason: format!("status poll task failed: {join_error}"),
                }
            })??;
            indexes.push(status.committed_index);
        }
        Ok(indexes)
    }
}

/// Wrap an operation with a bounded fixed-delay retry.
///
/// Retries only retryable failures (transport, non-ok status); exhaustion
/// returns a typed error naming the operation and the last failure.
pub async fn fetch_with_retry<T, F, Fut>(
    label: &str,
    retries: u32,
    delay: Duration,
    mut op: F,
) -> HarnessResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = HarnessResult<T>>,
{
    let attempts = retries + 1;
    let mut last_error = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < attempts => {
                debug!(label, attempt, %error, "Retryable failure; backing off");
                last_error = Some(error);
                sleep(delay).await;
            }
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) => {
                last_error = Some(error);
            }
        }
    }

    Err(HarnessError::RetriesExhausted {
        label: label.to_string(),
        attempts,
        last: Box::new(last_error.expect("at least one attempt ran")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_fetch_with_retry_succeeds_midway() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = fetch_with_retry("test-op", 3, Duration::from_millis(1), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(HarnessError::HttpTransport {
                        url: "http://localhost:1/x".into(),
                        reason: "connection refused".into(),
                    })
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fetch_with_retry_exhaustion_is_typed() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: HarnessResult<u32> =
            fetch_with_retry("flaky-health", 2, Duration::from_millis(1), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(HarnessError::HttpStatus {
                        url: "http://localhost:1/health".into(),
                        status: 503,
                        body: "{}".into(),
                    })
                }
            })
            .await;

        // retries=2 means three attempts total.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            HarnessError::RetriesExhausted { label, attempts, .. } => {
                assert_eq!(label, "flaky-health");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_with_retry_non_retryable_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: HarnessResult<u32> =
            fetch_with_retry("setup", 5, Duration::from_millis(1), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(HarnessError::Setup("missing directory".into()))
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result.unwrap_err(), HarnessError::Setup(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_convergence_wait_is_bounded_with_unreachable_members() {
        // Two clients pointing at ports nothing listens on: every status
        // poll fails, so the wait must burn its four attempts and report
        // non-convergence rather than hang.
        let cluster = ClusterClient::new(vec![
            NodeClient::new("127.0.0.1", 1, "k"),
            NodeClient::new("127.0.0.1", 2, "k"),
        ]);
        let started = tokio::time::Instant::now();
        let converged = cluster.wait_for_convergence().await;
        assert!(!converged);
        // Budget is 10 + 100 + 1000 + 10000 ms of sleeps plus poll time.
        assert!(started.elapsed() >= Duration::from_millis(11_110));
    }

    #[tokio::test]
    async fn test_single_node_cluster_is_trivially_converged() {
        let cluster = ClusterClient::new(vec![NodeClient::new("127.0.0.1", 1, "k")]);
        assert!(cluster.wait_for_convergence().await);
    }

    #[test]
    fn test_fetch_options_builders() {
        let options = FetchOptions::post(serde_json::json!({"name": "companies"}))
            .with_header("X-Extra", "1");
        assert_eq!(options.method, Method::POST);
        assert_eq!(options.headers.len(), 1);
        assert!(FetchOptions::delete().body.is_none());
    }
}
