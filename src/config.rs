use crate::replicator::membership::parse_node_id;
use crate::replicator::SyncPolicy;
use crate::types::{NodeId, ReplicaSetMember, MACHINE_ID_TAG};
use crate::upgrades::AgentConfig;
use openraft::SnapshotPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub machine_id: String,

    pub bind_addr: String,
    pub bind_port: u16,

    pub data_dir: PathBuf,

    pub agent_version: String,

    pub raft: RaftSettings,

    pub cluster: ClusterSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftSettings {
    pub heartbeat_interval_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub snapshot_threshold: u64,
    pub snapshot_retain: usize,
    pub sync_after_write: bool,
    pub expiry_sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    pub controller_uuid: String,
    pub members: Vec<MemberSettings>,
    pub legacy_leases_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSettings {
    pub machine_id: String,
    pub address: String,
    pub votes: Option<i32>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            machine_id: "0".to_string(),
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 17070,
            data_dir: PathBuf::from("/var/lib/raftlease"),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            raft: RaftSettings::default(),
            cluster: ClusterSettings::default(),
        }
    }
}

impl Default for RaftSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 500,
            election_timeout_min_ms: 1500,
            election_timeout_max_ms: 3000,
            snapshot_threshold: 1024,
            snapshot_retain: 1,
            sync_after_write: true,
            expiry_sweep_interval_secs: 1,
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            controller_uuid: String::new(),
            members: vec![MemberSettings {
                machine_id: "0".to_string(),
                address: "127.0.0.1:37017".to_string(),
                votes: None,
            }],
            legacy_leases_file: None,
        }
    }
}

impl MemberSettings {
    pub fn to_member(&self) -> ReplicaSetMember {
        ReplicaSetMember {
            address: self.address.clone(),
            tags: HashMap::from([(MACHINE_ID_TAG.to_string(), self.machine_id.clone())]),
            votes: self.votes,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &PathBuf) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn node_id(&self) -> anyhow::Result<NodeId> {
        Ok(parse_node_id(&self.machine_id)?)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.bind_port)
    }

    pub fn raft_dir(&self) -> PathBuf {
        self.data_dir.join("raft")
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        if self.raft.sync_after_write {
            SyncPolicy::SyncAfterWrite
        } else {
            SyncPolicy::NoSync
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            data_dir: self.data_dir.clone(),
            tag: format!("machine-{}", self.machine_id),
            upgraded_to_version: self.agent_version.clone(),
        }
    }

    pub fn members(&self) -> Vec<ReplicaSetMember> {
        self.cluster.members.iter().map(MemberSettings::to_member).collect()
    }

    pub fn raft_config(&self) -> openraft::Config {
        openraft::Config {
            cluster_name: if self.cluster.controller_uuid.is_empty() {
                "raftlease".to_string()
            } else {
                self.cluster.controller_uuid.clone()
            },
            heartbeat_interval: self.raft.heartbeat_interval_ms,
            election_timeout_min: self.raft.election_timeout_min_ms,
            election_timeout_max: self.raft.election_timeout_max_ms,
            snapshot_policy: SnapshotPolicy::LogsSinceLast(self.raft.snapshot_threshold),
            ..Default::default()
        }
    }
}
