pub mod api;
pub mod backend;
pub mod config;
pub mod daemon;
pub mod error;
pub mod raft_api;
pub mod replicator;
pub mod types;
pub mod upgrades;

pub use api::create_router;
pub use backend::{StateBackend, StaticStateBackend};
pub use config::NodeConfig;
pub use daemon::LeaseDaemon;
pub use error::{Error, LeaseError, StoreError};
pub use raft_api::create_raft_router;
pub use replicator::{LeaseFsm, NotifyTarget, RaftNode, Replicator};
pub use types::*;
