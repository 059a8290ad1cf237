//! dozed.toml configuration.
//!
//! Every field has a default, so an absent file or an empty one yields a
//! working single-node daemon. CLI flags are applied on top afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dozegrid_jobs::{JobsConfig, DEFAULT_WORKER_INTERVAL};
use dozegrid_queue::{RetryPolicy, DEFAULT_KEY_PREFIX};
use openraft::BasicNode;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub node_id: u64,
    pub data_dir: PathBuf,
    pub api_port: u16,
    pub worker_interval_ms: u64,
    /// Namespace jobs are created in.
    pub namespace: String,
    pub key_prefix: String,
    pub retry: RetryPolicy,
    pub raft: RaftSettings,
    /// JSON job templates. Takes precedence over `jobs`.
    pub jobs_config: Option<PathBuf>,
    pub jobs: Option<JobsConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            data_dir: PathBuf::from("/var/lib/dozegrid"),
            api_port: 3000,
            worker_interval_ms: DEFAULT_WORKER_INTERVAL.as_millis() as u64,
            namespace: "default".to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            retry: RetryPolicy::default(),
            raft: RaftSettings::default(),
            jobs_config: None,
            jobs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftSettings {
    pub port: u16,
    /// Address peers reach this node at. Defaults to `127.0.0.1:{port}`.
    pub advertise_addr: Option<String>,
    pub heartbeat_interval_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    /// Initialize the cluster from `peers` on start.
    pub bootstrap: bool,
    pub peers: Vec<Peer>,
}

impl Default for RaftSettings {
    fn default() -> Self {
        Self {
            port: 3262,
            advertise_addr: None,
            heartbeat_interval_ms: 500,
            election_timeout_min_ms: 1500,
            election_timeout_max_ms: 3000,
            bootstrap: false,
            peers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub id: u64,
    pub addr: String,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        info!(path = %path.display(), "daemon config loaded");
        Ok(config)
    }

    /// Load `path` when given, otherwise defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.worker_interval_ms.max(1))
    }

    /// Job templates from the configured file, the embedded table, or
    /// just `Default`.
    pub fn jobs_config(&self) -> anyhow::Result<JobsConfig> {
        if let Some(path) = &self.jobs_config {
            return Ok(JobsConfig::load(path)?);
        }
        Ok(self.jobs.clone().unwrap_or_default())
    }

    pub fn raft_advertise_addr(&self) -> String {
        self.raft
            .advertise_addr
            .clone()
            .unwrap_or_else(|| format!("127.0.0.1:{}", self.raft.port))
    }

    pub fn raft_config(&self) -> openraft::Config {
        openraft::Config {
            cluster_name: "dozegrid".to_string(),
            heartbeat_interval: self.raft.heartbeat_interval_ms,
            election_timeout_min: self.raft.election_timeout_min_ms,
            election_timeout_max: self.raft.election_timeout_max_ms,
            ..Default::default()
        }
    }

    /// Initial membership: the configured peers plus this node.
    pub fn raft_members(&self) -> BTreeMap<u64, BasicNode> {
        let mut members: BTreeMap<u64, BasicNode> = self
            .raft
            .peers
            .iter()
            .map(|p| (p.id, BasicNode::new(&p.addr)))
            .collect();
        members
            .entry(self.node_id)
            .or_insert_with(|| BasicNode::new(self.raft_advertise_addr()));
        members
    }
}
