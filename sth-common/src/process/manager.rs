//! Topology construction and the command surface used by the phase runner.
//!
//! One manager instance exists per harness run and owns the port-keyed
//! process registry exclusively; every mutation goes through it.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::api::{CollectionResponse, CollectionSchema, ConversationModelSchema, SearchQuery, SearchResponse};
use crate::client::NodeClient;
use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::net::resolve_bind_address;
use crate::process::controller::ProcessController;
use crate::types::{ClusterMembership, NodeDescriptor, Topology};

/// Poll interval for health waits.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Options for topology setup.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupOptions {
    /// Reuse existing data directories unchanged. Restart tests rely on
    /// this to prove persistence; the membership record is still rewritten.
    pub skip_cleanup: bool,
}

/// Options for starting one process.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Pass the membership file so the node joins a cluster.
    pub multi_node: bool,
}

/// Owns every spawned server process for one harness run.
#[derive(Debug)]
pub struct ProcessManager {
    config: HarnessConfig,
    registry: RwLock<HashMap<u16, ProcessController>>,
    /// Bind address resolved once per run and reused for every node.
    resolved_address: Mutex<Option<String>>,
    /// Whether processes on this topology peer through the membership file.
    current_topology: Mutex<Option<Topology>>,
}

impl ProcessManager {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            registry: RwLock::new(HashMap::new()),
            resolved_address: Mutex::new(None),
            current_topology: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Resolve (or reuse) the bind address shared by all nodes.
    pub async fn bind_address(&self) -> HarnessResult<String> {
        let mut cached = self.resolved_address.lock().await;
        if let Some(address) = cached.as_ref() {
            return Ok(address.clone());
        }
        let address = resolve_bind_address(&self.config)?;
        *cached = Some(address.clone());
        Ok(address)
    }

    /// Materialize the directory layout and membership record for a topology.
    ///
    /// The membership record is always written (the format is uniform even
    /// for a single node) and flushed before any process can be spawned.
    /// Directory creation and existence are validated independently so a
    /// partial creation cannot silently proceed.
    pub async fn setup_nodes(
        &self,
        topology: Topology,
        options: SetupOptions,
    ) -> HarnessResult<Vec<NodeDescriptor>> {
        let descriptors = topology.descriptors(
            &self.config.work_dir,
            self.config.base_api_port,
            self.config.base_peering_port,
        );

        let address = self.bind_address().await?;
        let membership = ClusterMembership::for_nodes(&address, &descriptors);
        membership.write_to(&self.config.membership_path())?;
        debug!(
            path = %self.config.membership_path().display(),
            record = %membership.to_line(),
            "Membership record written"
        );

        for node in &descriptors {
            if !options.skip_cleanup {
                let node_dir = self.config.work_dir.join(format!("node-{}", node.index));
                match std::fs::remove_dir_all(&node_dir) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(HarnessError::fs(node_dir, e)),
                }
            }
            for dir in node.directories() {
                std::fs::create_dir_all(dir).map_err(|e| HarnessError::fs(dir, e))?;
            }
        }

        // Stage one: the topology produced the expected node count.
        if descriptors.len() != topology.node_count() {
            return Err(HarnessError::Setup(format!(
                "expected {} node descriptors, produced {}",
                topology.node_count(),
                descriptors.len()
            )));
        }
        // Stage two: every directory independently verified on disk.
        for node in &descriptors {
            for dir in node.directories() {
                if !dir.is_dir() {
                    return Err(HarnessError::Setup(format!(
                        "node {} directory missing after setup: {}",
                        node.index,
                        dir.display()
                    )));
                }
            }
        }

        *self.current_topology.lock().await = Some(topology);
        info!(%topology, nodes = descriptors.len(), skip_cleanup = options.skip_cleanup, "Topology ready");
        Ok(descriptors)
    }

    /// Spawn one node and register its controller under its HTTP port.
    pub async fn start_process(
        &self,
        node: &NodeDescriptor,
        options: StartOptions,
    ) -> HarnessResult<()> {
        {
            let registry = self.registry.read().await;
            if registry.contains_key(&node.api_port) {
                return Err(HarnessError::PortInUse(node.api_port));
            }
        }

        let address = self.bind_address().await?;
        let args = self.build_args(node, &address, options.multi_node);
        let env = self.build_env();

        let controller = ProcessController::spawn(&self.config.binary, &args, &env, node.clone())?;

        let mut registry = self.registry.write().await;
        // Re-check under the write lock; the invariant is one live process
        // per port, full stop.
        if registry.contains_key(&node.api_port) {
            return Err(HarnessError::PortInUse(node.api_port));
        }
        registry.insert(node.api_port, controller);
        Ok(())
    }

    /// The exact flag vocabulary the server binary expects.
    fn build_args(&self, node: &NodeDescriptor, address: &str, multi_node: bool) -> Vec<String> {
        let mut args = vec![
            format!("--data-dir={}", node.data_dir.display()),
            format!("--api-key={}", self.config.api_key),
            format!("--api-port={}", node.api_port),
            format!("--api-address={address}"),
            format!("--peering-port={}", node.peering_port),
            format!("--peering-address={address}"),
            format!("--log-dir={}", node.log_dir.display()),
            format!("--analytics-dir={}", node.analytics_dir.display()),
            "--enable-cors".to_string(),
            "--enable-search-analytics=true".to_string(),
        ];
        if multi_node {
            args.push(format!("--nodes={}", self.config.membership_path().display()));
        }
        args
    }

    /// Environment on top of the inherited one: proxy overrides route the
    /// server's outbound embedding calls through the interception proxy.
    fn build_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(proxy) = &self.config.proxy_url {
            env.push(("HTTP_PROXY".to_string(), proxy.clone()));
            env.push(("HTTPS_PROXY".to_string(), proxy.clone()));
        }
        env
    }

    /// Client for the node registered on `port`.
    pub async fn client_for(&self, port: u16) -> HarnessResult<NodeClient> {
        let registry = self.registry.read().await;
        if !registry.contains_key(&port) {
            return Err(HarnessError::UnknownPort(port));
        }
        let address = self.bind_address().await?;
        Ok(NodeClient::new(&address, port, &self.config.api_key))
    }

    /// Health-check one node. A reachable node reporting not-ok is a
    /// distinct failure from a network-level one.
    pub async fn get_health(&self, port: u16) -> HarnessResult<()> {
        let client = self.client_for(port).await?;
        let health = client.health().await?;
        if !health.ok {
            return Err(HarnessError::HealthCheck {
                port,
                body: "{\"ok\":false}".to_string(),
            });
        }
        Ok(())
    }

    /// Poll health until it succeeds or the budget runs out.
    pub async fn wait_for_health(&self, port: u16, budget: Duration) -> HarnessResult<()> {
        let started = std::time::Instant::now();
        let mut last_error = None;
        while started.elapsed() < budget {
            match self.get_health(port).await {
                Ok(()) => {
                    debug!(port, elapsed = ?started.elapsed(), "Node healthy");
                    return Ok(());
                }
                Err(error) => last_error = Some(error),
            }
            sleep(HEALTH_POLL_INTERVAL).await;
        }
        Err(HarnessError::Timeout(
            budget,
            format!(
                "node on port {port} never became healthy (last: {})",
                last_error.map(|e| e.to_string()).unwrap_or_default()
            ),
        ))
    }

    /// Snapshot one node's state into `destination` via its admin API.
    pub async fn snapshot(&self, port: u16, destination: &Path) -> HarnessResult<()> {
        std::fs::create_dir_all(destination).map_err(|e| HarnessError::fs(destination, e))?;
        let client = self.client_for(port).await?;
        let response = client.snapshot(&destination.display().to_string()).await?;
        if !response.success {
            return Err(HarnessError::ProcessRuntime {
                port,
                reason: "snapshot operation reported failure".to_string(),
            });
        }
        info!(port, destination = %destination.display(), "Snapshot completed");
        Ok(())
    }

    /// Dispose and restart the process on `port`, preserving its data
    /// directory; this is how restart phases validate durability.
    pub async fn restart_process(&self, port: u16) -> HarnessResult<()> {
        let mut controller = {
            let mut registry = self.registry.write().await;
            registry
                .remove(&port)
                .ok_or(HarnessError::UnknownPort(port))?
        };
        let descriptor = controller.descriptor().clone();
        controller.dispose().await?;

        let multi_node = matches!(
            *self.current_topology.lock().await,
            Some(Topology::Cluster)
        );
        self.start_process(&descriptor, StartOptions { multi_node })
            .await
    }

    /// Ports with a registered process, ascending.
    pub async fn registered_ports(&self) -> Vec<u16> {
        let registry = self.registry.read().await;
        let mut ports: Vec<u16> = registry.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Dispose every registered process. Individual failures are logged
    /// and the rest still disposed; the first failure is reported.
    pub async fn dispose_all(&self) -> HarnessResult<()> {
        let controllers: Vec<ProcessController> = {
            let mut registry = self.registry.write().await;
            registry.drain().map(|(_, controller)| controller).collect()
        };

        let mut first_failure = None;
        for mut controller in controllers {
            let port = controller.port();
            if let Err(error) = controller.dispose().await {
                warn!(port, %error, "Failed to dispose process");
                if first_failure.is_none() {
                    first_failure = Some(error);
                }
            }
        }
        match first_failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    // ── Typed API forwards ───────────────────────────────────────────────
    // Thin wrappers: forward the call, surface the failure, add nothing.

    pub async fn create_collection(
        &self,
        port: u16,
        schema: &CollectionSchema,
    ) -> HarnessResult<CollectionResponse> {
        self.client_for(port).await?.create_collection(schema).await
    }

    pub async fn index_documents(
        &self,
        port: u16,
        collection: &str,
        documents: &[Value],
    ) -> HarnessResult<()> {
        self.client_for(port)
            .await?
            .import_documents(collection, documents, self.config.batch_size)
            .await
    }

    pub async fn query_collection(
        &self,
        port: u16,
        collection: &str,
        query: &SearchQuery,
    ) -> HarnessResult<SearchResponse> {
        self.client_for(port).await?.search(collection, query).await
    }

    pub async fn create_conversation_model(
        &self,
        port: u16,
        model: &ConversationModelSchema,
    ) -> HarnessResult<Value> {
        self.client_for(port)
            .await?
            .create_conversation_model(model)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;

    fn manager_in(dir: &Path) -> ProcessManager {
        ProcessManager::new(HarnessConfig::for_tests(dir))
    }

    #[tokio::test]
    async fn test_setup_nodes_single_produces_one_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let nodes = manager
            .setup_nodes(Topology::Single, SetupOptions::default())
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        for node in &nodes {
            for d in node.directories() {
                assert!(d.is_dir(), "{} must exist", d.display());
            }
        }
    }

    #[tokio::test]
    async fn test_setup_nodes_cluster_produces_three_and_membership() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let nodes = manager
            .setup_nodes(Topology::Cluster, SetupOptions::default())
            .await
            .unwrap();
        assert_eq!(nodes.len(), 3);

        let record = std::fs::read_to_string(manager.config().membership_path()).unwrap();
        let parsed = ClusterMembership::parse(&record).unwrap();
        assert_eq!(parsed.entries.len(), 3);
        assert_eq!(parsed.entries[0].api_port, nodes[0].api_port);
    }

    #[tokio::test]
    async fn test_setup_nodes_skip_cleanup_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let nodes = manager
            .setup_nodes(Topology::Single, SetupOptions::default())
            .await
            .unwrap();
        let marker = nodes[0].data_dir.join("db-file");
        std::fs::write(&marker, b"persisted").unwrap();

        // Fresh setup wipes...
        manager
            .setup_nodes(Topology::Single, SetupOptions::default())
            .await
            .unwrap();
        assert!(!marker.exists());

        // ...skip_cleanup does not.
        std::fs::write(&marker, b"persisted").unwrap();
        manager
            .setup_nodes(Topology::Single, SetupOptions { skip_cleanup: true })
            .await
            .unwrap();
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_membership_rewritten_even_with_skip_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        manager
            .setup_nodes(Topology::Single, SetupOptions::default())
            .await
            .unwrap();
        std::fs::write(manager.config().membership_path(), "scribbled").unwrap();
        manager
            .setup_nodes(Topology::Single, SetupOptions { skip_cleanup: true })
            .await
            .unwrap();
        let record = std::fs::read_to_string(manager.config().membership_path()).unwrap();
        assert!(ClusterMembership::parse(&record).is_ok());
    }

    #[tokio::test]
    async fn test_build_args_single_omits_nodes_flag() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let nodes = Topology::Single.descriptors(dir.path(), 8108, 8107);
        let args = manager.build_args(&nodes[0], "127.0.0.1", false);
        assert!(args.iter().any(|a| a == "--api-port=8108"));
        assert!(args.iter().any(|a| a == "--peering-port=8107"));
        assert!(args.iter().any(|a| a == "--enable-cors"));
        assert!(!args.iter().any(|a| a.starts_with("--nodes=")));
    }

    #[tokio::test]
    async fn test_build_args_multi_includes_nodes_flag() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let nodes = Topology::Cluster.descriptors(dir.path(), 8108, 8107);
        let args = manager.build_args(&nodes[1], "127.0.0.1", true);
        assert!(args.iter().any(|a| a.starts_with("--nodes=")));
        assert!(args.iter().any(|a| a == "--api-port=8118"));
    }

    #[tokio::test]
    async fn test_build_env_carries_proxy_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HarnessConfig::for_tests(dir.path());
        config.proxy_url = Some("http://127.0.0.1:9999".to_string());
        let manager = ProcessManager::new(config);
        let env = manager.build_env();
        assert!(env.contains(&("HTTP_PROXY".into(), "http://127.0.0.1:9999".into())));
        assert!(env.contains(&("HTTPS_PROXY".into(), "http://127.0.0.1:9999".into())));
    }

    #[tokio::test]
    async fn test_client_for_unknown_port() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let err = manager.client_for(8108).await.unwrap_err();
        assert!(matches!(err, HarnessError::UnknownPort(8108)));
    }

    #[cfg(unix)]
    mod live {
        use super::*;

        /// Install /bin/sleep as the "server binary" so lifecycle paths can
        /// be exercised without the real search server.
        fn sleeper_manager(dir: &Path) -> ProcessManager {
            let mut config = HarnessConfig::for_tests(dir);
            config.binary = "/bin/sleep".into();
            ProcessManager::new(config)
        }

        /// Sleep rejects the server flags and exits quickly; spawning,
        /// registry bookkeeping, and disposal are still real.
        async fn start_sleeper(manager: &ProcessManager, node: &NodeDescriptor) {
            manager
                .start_process(node, StartOptions::default())
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_start_registers_and_port_in_use_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let manager = sleeper_manager(dir.path());
            let nodes = manager
                .setup_nodes(Topology::Single, SetupOptions::default())
                .await
                .unwrap();

            start_sleeper(&manager, &nodes[0]).await;
            assert_eq!(manager.registered_ports().await, vec![nodes[0].api_port]);

            let err = manager
                .start_process(&nodes[0], StartOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, HarnessError::PortInUse(_)));

            manager.dispose_all().await.unwrap();
            assert!(manager.registered_ports().await.is_empty());
        }

        #[tokio::test]
        async fn test_restart_preserves_descriptor_registration() {
            let dir = tempfile::tempdir().unwrap();
            let manager = sleeper_manager(dir.path());
            let nodes = manager
                .setup_nodes(Topology::Single, SetupOptions::default())
                .await
                .unwrap();

            start_sleeper(&manager, &nodes[0]).await;
            manager.restart_process(nodes[0].api_port).await.unwrap();
            assert_eq!(manager.registered_ports().await, vec![nodes[0].api_port]);

            manager.dispose_all().await.unwrap();
        }

        #[tokio::test]
        async fn test_dispose_all_is_safe_on_empty_registry() {
            let dir = tempfile::tempdir().unwrap();
            let manager = sleeper_manager(dir.path());
            manager.dispose_all().await.unwrap();
        }
    }
}
