use crate::config::NodeConfig;
use crate::replicator::notify::{LoggingTarget, NotifyTarget};
use crate::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// The slice of controller state the raft upgrade steps read.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn replica_set_members(&self) -> Result<Vec<ReplicaSetMember>>;
    async fn state_serving_info(&self) -> Result<StateServingInfo>;
    /// Read by bootstrap to name the controller whose raft log it seeds.
    async fn controller_config(&self) -> Result<ControllerConfig>;

    /// Leases held in the pre-raft lease store. `local_time` is the caller's
    /// clock, for stores that record lease times relative to it.
    async fn legacy_leases(&self, local_time: DateTime<Utc>) -> Result<BTreeMap<LeaseKey, LeaseInfo>>;
    async fn drop_leases_collection(&self) -> Result<()>;

    fn lease_notify_target(&self) -> Result<Arc<dyn NotifyTarget>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyLease {
    pub key: LeaseKey,
    pub holder: String,
    pub start: DateTime<Utc>,
    pub duration_secs: u64,
}

/// A backend answering from the node's own configuration file, with legacy
/// leases read from a JSON file. Lets a standalone daemon run the upgrade
/// steps without a controller database.
pub struct StaticStateBackend {
    members: Vec<ReplicaSetMember>,
    info: StateServingInfo,
    config: ControllerConfig,
    legacy_leases_file: Option<PathBuf>,
}

impl StaticStateBackend {
    pub fn new(
        members: Vec<ReplicaSetMember>,
        info: StateServingInfo,
        config: ControllerConfig,
        legacy_leases_file: Option<PathBuf>,
    ) -> Self {
        Self {
            members,
            info,
            config,
            legacy_leases_file,
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(
            config.members(),
            StateServingInfo {
                api_port: config.bind_port,
            },
            ControllerConfig {
                controller_uuid: config.cluster.controller_uuid.clone(),
            },
            config.cluster.legacy_leases_file.clone(),
        )
    }
}

#[async_trait]
impl StateBackend for StaticStateBackend {
    async fn replica_set_members(&self) -> Result<Vec<ReplicaSetMember>> {
        Ok(self.members.clone())
    }

    async fn state_serving_info(&self) -> Result<StateServingInfo> {
        Ok(self.info.clone())
    }

    async fn controller_config(&self) -> Result<ControllerConfig> {
        Ok(self.config.clone())
    }

    async fn legacy_leases(&self, _local_time: DateTime<Utc>) -> Result<BTreeMap<LeaseKey, LeaseInfo>> {
        let Some(path) = &self.legacy_leases_file else {
            return Ok(BTreeMap::new());
        };
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read(path)
            .with_context(|| format!("reading legacy leases from {:?}", path))?;
        let leases: Vec<LegacyLease> = serde_json::from_slice(&content)
            .with_context(|| format!("parsing legacy leases in {:?}", path))?;

        Ok(leases
            .into_iter()
            .map(|l| {
                (
                    l.key,
                    LeaseInfo {
                        holder: l.holder,
                        start: l.start,
                        duration: std::time::Duration::from_secs(l.duration_secs),
                    },
                )
            })
            .collect())
    }

    async fn drop_leases_collection(&self) -> Result<()> {
        if let Some(path) = &self.legacy_leases_file {
            if path.exists() {
                std::fs::remove_file(path)
                    .with_context(|| format!("removing legacy leases file {:?}", path))?;
                info!("Dropped legacy leases file {:?}", path);
            }
        }
        Ok(())
    }

    fn lease_notify_target(&self) -> Result<Arc<dyn NotifyTarget>> {
        Ok(Arc::new(LoggingTarget))
    }
}
