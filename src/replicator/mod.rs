pub mod log_store;
pub mod membership;
pub mod network;
pub mod notify;
pub mod raft_node;
pub mod snapshot_store;
pub mod state_machine;
pub mod storage;

pub use log_store::{LogStore, SyncPolicy};
pub use membership::{derive_configuration, from_membership, to_membership};
pub use network::*;
pub use notify::*;
pub use raft_node::*;
pub use snapshot_store::{SnapshotStore, StoredSnapshot};
pub use state_machine::{LeaseFsm, LeaseSnapshot, LeaseTable};
pub use storage::*;

use crate::types::*;
use async_trait::async_trait;

#[async_trait]
pub trait Replicator: Send + Sync {
    async fn propose(&self, command: LeaseCommand) -> anyhow::Result<LeaseResponse>;
    fn leases(&self) -> Vec<(LeaseKey, LeaseInfo)>;
    fn is_leader(&self) -> bool;
    fn leader_id(&self) -> Option<NodeId>;
}
