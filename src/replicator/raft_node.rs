use crate::config::NodeConfig;
use crate::replicator::log_store::LogStore;
use crate::replicator::membership::from_membership;
use crate::replicator::network::HttpNetworkFactory;
use crate::replicator::notify::{Leadership, NotifyTarget};
use crate::replicator::snapshot_store::SnapshotStore;
use crate::replicator::state_machine::LeaseFsm;
use crate::replicator::storage::{create_storage, LeaseStore, TypeConfig};
use crate::replicator::Replicator;
use crate::types::*;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use openraft::Raft;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub type LeaseRaft = Raft<TypeConfig>;

/// A running raft member: the consensus engine plus the storage and state
/// machine it drives.
pub struct RaftNode {
    node_id: NodeId,
    raft: LeaseRaft,
    fsm: Arc<LeaseFsm>,
    log: Arc<LogStore>,
    leadership_watch: JoinHandle<()>,
}

impl RaftNode {
    /// Opens the storage laid down by the bootstrap upgrade step and starts
    /// raft on it.
    pub async fn start(config: &NodeConfig, target: Arc<dyn NotifyTarget>) -> Result<Self> {
        let node_id = config.node_id()?;
        let raft_config = Arc::new(config.raft_config().validate()?);

        let raft_dir = config.raft_dir();
        let log = Arc::new(LogStore::open(raft_dir.join("logs"), config.sync_policy())?);

        match log.local_id()? {
            Some(id) if id != node_id => {
                bail!("raft storage at {:?} belongs to node {}, not {}", raft_dir, id, node_id)
            }
            Some(_) => {}
            None => bail!("raft storage at {:?} has not been bootstrapped", raft_dir),
        }

        let snapshots = Arc::new(SnapshotStore::open(
            raft_dir.join("snapshots"),
            config.raft.snapshot_retain,
        )?);
        let leadership = Leadership::new();
        let fsm = Arc::new(LeaseFsm::new(target, leadership.clone()));
        let store = LeaseStore::new(log.clone(), snapshots, fsm.clone())?;
        let (log_store, sm_store) = create_storage(store);

        let raft = Raft::new(
            node_id,
            raft_config,
            HttpNetworkFactory::new(),
            log_store,
            sm_store,
        )
        .await?;

        let leadership_watch = spawn_leadership_watch(node_id, &raft, leadership);

        info!(
            "Raft node {} started with storage at {:?}",
            node_id, raft_dir
        );

        Ok(Self {
            node_id,
            raft,
            fsm,
            log,
            leadership_watch,
        })
    }

    pub fn raft(&self) -> &LeaseRaft {
        &self.raft
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn fsm(&self) -> &Arc<LeaseFsm> {
        &self.fsm
    }

    pub fn servers(&self) -> Vec<ServerConfig> {
        let metrics = self.raft.metrics().borrow().clone();
        from_membership(metrics.membership_config.membership())
    }

    pub fn status(&self) -> NodeStatus {
        let metrics = self.raft.metrics().borrow().clone();
        NodeStatus {
            node_id: self.node_id,
            is_leader: metrics.current_leader == Some(self.node_id),
            leader_id: metrics.current_leader,
            term: metrics.current_term,
            last_applied: metrics.last_applied.map(|l| l.index),
            lease_count: self.fsm.table().len(),
        }
    }

    /// Stops raft and flushes the log. Safe to call on every exit path.
    pub async fn shutdown(&self) -> Result<()> {
        self.leadership_watch.abort();
        self.fsm.leadership().set(false);
        if let Err(e) = self.raft.shutdown().await {
            warn!("Raft shutdown error: {}", e);
        }
        self.log.flush()?;
        info!("Raft node {} stopped", self.node_id);
        Ok(())
    }
}

fn spawn_leadership_watch(node_id: NodeId, raft: &LeaseRaft, leadership: Leadership) -> JoinHandle<()> {
    let mut metrics = raft.metrics();
    tokio::spawn(async move {
        loop {
            let is_leader = metrics.borrow().current_leader == Some(node_id);
            if is_leader != leadership.is_leader() {
                info!("Node {} leadership changed: leader={}", node_id, is_leader);
            }
            leadership.set(is_leader);
            if metrics.changed().await.is_err() {
                leadership.set(false);
                break;
            }
        }
    })
}

#[async_trait]
impl Replicator for RaftNode {
    async fn propose(&self, command: LeaseCommand) -> Result<LeaseResponse> {
        let request = LeaseRequest::new(command, Utc::now());
        let resp = self
            .raft
            .client_write(request)
            .await
            .map_err(|e| anyhow!("Raft write failed: {}", e))?;
        Ok(resp.data)
    }

    fn leases(&self) -> Vec<(LeaseKey, LeaseInfo)> {
        self.fsm.leases()
    }

    fn is_leader(&self) -> bool {
        self.fsm.leadership().is_leader()
    }

    fn leader_id(&self) -> Option<NodeId> {
        let metrics = self.raft.metrics().borrow().clone();
        metrics.current_leader
    }
}
