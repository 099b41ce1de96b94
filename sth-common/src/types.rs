//! Core data model: node descriptors, topologies, phases, and the
//! cluster membership record consumed by the server binary.

use std::fmt;
use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{HarnessError, HarnessResult};

/// Identity and filesystem layout of one server node.
///
/// Created once per topology and immutable afterwards; restart phases
/// reuse the same descriptor so the data directory survives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Zero-based logical index within the topology.
    pub index: usize,
    /// HTTP API port.
    pub api_port: u16,
    /// Raft/peering port.
    pub peering_port: u16,
    /// Data directory (persisted across restart phases).
    pub data_dir: PathBuf,
    /// Server log directory.
    pub log_dir: PathBuf,
    /// Search analytics directory.
    pub analytics_dir: PathBuf,
}

impl NodeDescriptor {
    /// Directories that must exist before the node can start.
    pub fn directories(&self) -> [&Path; 3] {
        [&self.data_dir, &self.log_dir, &self.analytics_dir]
    }
}

/// Process topology for a test stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Single,
    Cluster,
}

impl Topology {
    /// Fixed node count for this topology.
    pub fn node_count(&self) -> usize {
        match self {
            Self::Single => 1,
            Self::Cluster => 3,
        }
    }

    /// Materialize descriptors under `work_dir`, spacing ports by 10 so
    /// peering and API ports of adjacent nodes never collide.
    pub fn descriptors(
        &self,
        work_dir: &Path,
        base_api_port: u16,
        base_peering_port: u16,
    ) -> Vec<NodeDescriptor> {
        (0..self.node_count())
            .map(|index| {
                let offset = (index as u16) * 10;
                let node_dir = work_dir.join(format!("node-{index}"));
                NodeDescriptor {
                    index,
                    api_port: base_api_port + offset,
                    peering_port: base_peering_port + offset,
                    data_dir: node_dir.join("data"),
                    log_dir: node_dir.join("logs"),
                    analytics_dir: node_dir.join("analytics"),
                }
            })
            .collect()
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Cluster => write!(f, "cluster"),
        }
    }
}

/// Lifecycle phase labels, used to build test-name filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    FreshSingle,
    RestartedSingle,
    SnapshotSingle,
    FreshMulti,
    RestartedMulti,
    SnapshotMulti,
    /// Topology-independent tests run after both stages.
    NoPhase,
}

impl Phase {
    /// Phases of the single-node stage, in execution order.
    pub const SINGLE_STAGE: [Phase; 3] = [
        Phase::FreshSingle,
        Phase::RestartedSingle,
        Phase::SnapshotSingle,
    ];

    /// Phases of the multi-node stage, in execution order.
    pub const MULTI_STAGE: [Phase; 3] = [
        Phase::FreshMulti,
        Phase::RestartedMulti,
        Phase::SnapshotMulti,
    ];

    /// Topology this phase runs against, if any.
    pub fn topology(&self) -> Option<Topology> {
        match self {
            Phase::FreshSingle | Phase::RestartedSingle | Phase::SnapshotSingle => {
                Some(Topology::Single)
            }
            Phase::FreshMulti | Phase::RestartedMulti | Phase::SnapshotMulti => {
                Some(Topology::Cluster)
            }
            Phase::NoPhase => None,
        }
    }

    /// Kebab-case label used in filters and banners.
    pub fn label(&self) -> &'static str {
        match self {
            Phase::FreshSingle => "fresh-single",
            Phase::RestartedSingle => "restarted-single",
            Phase::SnapshotSingle => "snapshot-single",
            Phase::FreshMulti => "fresh-multi",
            Phase::RestartedMulti => "restarted-multi",
            Phase::SnapshotMulti => "snapshot-multi",
            Phase::NoPhase => "no-phase",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One `ip:peeringPort:httpPort` triple in the membership record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub address: String,
    pub peering_port: u16,
    pub api_port: u16,
}

impl fmt::Display for MemberEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.address, self.peering_port, self.api_port)
    }
}

/// The on-disk cluster membership record.
///
/// Format is a collaborator contract: a single line of comma-separated
/// triples, consumed by the spawned binary via `--nodes=<path>`. There is
/// no trailing-newline requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMembership {
    pub entries: Vec<MemberEntry>,
}

impl ClusterMembership {
    /// Build a record for `nodes`, all reachable at `address`.
    pub fn for_nodes(address: &str, nodes: &[NodeDescriptor]) -> Self {
        Self {
            entries: nodes
                .iter()
                .map(|node| MemberEntry {
                    address: address.to_string(),
                    peering_port: node.peering_port,
                    api_port: node.api_port,
                })
                .collect(),
        }
    }

    /// Serialize to the wire format.
    pub fn to_line(&self) -> String {
        self.entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse the wire format back into entries.
    pub fn parse(line: &str) -> HarnessResult<Self> {
        let mut entries = Vec::new();
        for triple in line.trim().split(',').filter(|t| !t.is_empty()) {
            let parts: Vec<&str> = triple.split(':').collect();
            if parts.len() != 3 {
                return Err(HarnessError::Config(format!(
                    "malformed membership triple '{triple}'"
                )));
            }
            let peering_port = parts[1].parse::<u16>().map_err(|_| {
                HarnessError::Config(format!("bad peering port in '{triple}'"))
            })?;
            let api_port = parts[2]
                .parse::<u16>()
                .map_err(|_| HarnessError::Config(format!("bad api port in '{triple}'")))?;
            entries.push(MemberEntry {
                address: parts[0].to_string(),
                peering_port,
                api_port,
            });
        }
        Ok(Self { entries })
    }

    /// Write and flush the record so it is durably on disk before any
    /// process that depends on it is spawned.
    pub fn write_to(&self, path: &Path) -> HarnessResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HarnessError::fs(parent, e))?;
        }
        let mut file = File::create(path).map_err(|e| HarnessError::fs(path, e))?;
        file.write_all(self.to_line().as_bytes())
            .map_err(|e| HarnessError::fs(path, e))?;
        file.sync_all().map_err(|e| HarnessError::fs(path, e))?;
        Ok(())
    }
}
