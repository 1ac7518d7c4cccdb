use crate::backend::{StateBackend, StaticStateBackend};
use crate::config::NodeConfig;
use crate::replicator::{RaftNode, Replicator};
use crate::types::*;
use crate::upgrades::{run_upgrade_steps, StepContext};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct LeaseDaemon {
    node: Arc<RaftNode>,
    config: NodeConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl LeaseDaemon {
    /// Runs the upgrade steps against `backend`, then starts the raft node on
    /// the storage they prepared.
    pub async fn new(config: NodeConfig, backend: impl StateBackend + 'static) -> Result<Self> {
        let node_id = config.node_id()?;
        info!("Initializing LeaseDaemon node_id={}", node_id);

        std::fs::create_dir_all(&config.data_dir)?;

        let target = backend.lease_notify_target()?;
        let ctx = StepContext::new(config.agent_config(), backend);
        run_upgrade_steps(&ctx).await?;

        let node = Arc::new(RaftNode::start(&config, target).await?);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            node,
            config,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub async fn from_config(config: NodeConfig) -> Result<Self> {
        let backend = StaticStateBackend::from_config(&config);
        Self::new(config, backend).await
    }

    pub async fn run(&self) -> Result<()> {
        info!("Starting LeaseDaemon...");

        let sweeper_handle = self.spawn_expiry_sweeper();

        info!("LeaseDaemon running on {}", self.config.listen_addr());

        tokio::select! {
            _ = sweeper_handle => {
                error!("Expiry sweeper exited unexpectedly");
            }
            _ = self.wait_for_shutdown() => {
                info!("Shutdown signal received");
            }
        }

        self.node.shutdown().await
    }

    /// On the leader, proposes an expiry for every lease whose term has run
    /// out. Followers only tick.
    fn spawn_expiry_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let node = self.node.clone();
        let interval = self.config.raft.expiry_sweep_interval_secs.max(1);
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !node.is_leader() {
                            continue;
                        }

                        let expired = node.fsm().expired_at(Utc::now());
                        if expired.is_empty() {
                            continue;
                        }
                        debug!("Expiring {} leases", expired.len());

                        for key in expired {
                            match node.propose(LeaseCommand::Expire { key: key.clone() }).await {
                                Ok(_) => debug!("Expired lease {}", key),
                                Err(e) => {
                                    warn!("Failed to expire lease {}: {}", key, e);
                                    break;
                                }
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }
        })
    }

    async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn node(&self) -> &Arc<RaftNode> {
        &self.node
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}
