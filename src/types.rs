use crate::error::LeaseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

pub type NodeId = u64;

/// Replica-set tag carrying a member's machine identity.
pub const MACHINE_ID_TAG: &str = "juju-machine-id";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeaseKey {
    pub namespace: String,
    pub model_uuid: String,
    pub lease: String,
}

impl LeaseKey {
    pub fn new(
        namespace: impl Into<String>,
        model_uuid: impl Into<String>,
        lease: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            model_uuid: model_uuid.into(),
            lease: lease.into(),
        }
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.model_uuid, self.lease)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub holder: String,
    pub start: DateTime<Utc>,
    pub duration: Duration,
}

impl LeaseInfo {
    /// `None` when the duration is too large to represent as a timestamp.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|d| self.start.checked_add_signed(d))
    }

    pub fn is_live_at(&self, at: DateTime<Utc>) -> bool {
        match self.expiry() {
            Some(expiry) => expiry > at,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseCommand {
    Claim {
        key: LeaseKey,
        holder: String,
        duration: Duration,
    },
    Extend {
        key: LeaseKey,
        holder: String,
        duration: Duration,
    },
    Expire {
        key: LeaseKey,
    },
    Revoke {
        key: LeaseKey,
        holder: String,
    },
}

impl LeaseCommand {
    pub fn key(&self) -> &LeaseKey {
        match self {
            LeaseCommand::Claim { key, .. }
            | LeaseCommand::Extend { key, .. }
            | LeaseCommand::Expire { key }
            | LeaseCommand::Revoke { key, .. } => key,
        }
    }
}

/// A lease command as written to the log. The proposing leader stamps `at`,
/// so applying a request never consults the local clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub command: LeaseCommand,
    pub at: DateTime<Utc>,
}

impl LeaseRequest {
    pub fn new(command: LeaseCommand, at: DateTime<Utc>) -> Self {
        Self { command, at }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseResponse {
    Applied,
    Rejected(LeaseError),
}

impl LeaseResponse {
    pub fn into_result(self) -> Result<(), LeaseError> {
        match self {
            LeaseResponse::Applied => Ok(()),
            LeaseResponse::Rejected(err) => Err(err),
        }
    }
}

/// A lease transition emitted by the state machine once a command commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseEvent {
    Claimed { key: LeaseKey, holder: String },
    Expired { key: LeaseKey },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSetMember {
    pub address: String,
    pub tags: HashMap<String, String>,
    /// `None` is a default voter; `Some(0)` is a non-voter.
    pub votes: Option<i32>,
}

impl ReplicaSetMember {
    pub fn machine_id(&self) -> Option<&str> {
        self.tags.get(MACHINE_ID_TAG).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Suffrage {
    Voter,
    NonVoter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub id: NodeId,
    pub address: String,
    pub suffrage: Suffrage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateServingInfo {
    pub api_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub controller_uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub is_leader: bool,
    pub leader_id: Option<NodeId>,
    pub term: u64,
    pub last_applied: Option<u64>,
    pub lease_count: usize,
}
