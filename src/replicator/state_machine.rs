use crate::error::LeaseError;
use crate::replicator::notify::{dispatch, Leadership, NotifyTarget};
use crate::replicator::storage::{LeaseNode, TypeConfig};
use crate::types::*;
use chrono::{DateTime, Utc};
use openraft::{Entry, EntryPayload, LogId, StoredMembership};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// The lease table. Ordered by key so that iteration, and therefore any
/// serialized form, is identical on every node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "Vec<(LeaseKey, LeaseInfo)>",
    into = "Vec<(LeaseKey, LeaseInfo)>"
)]
pub struct LeaseTable {
    leases: BTreeMap<LeaseKey, LeaseInfo>,
}

impl From<Vec<(LeaseKey, LeaseInfo)>> for LeaseTable {
    fn from(entries: Vec<(LeaseKey, LeaseInfo)>) -> Self {
        Self {
            leases: entries.into_iter().collect(),
        }
    }
}

impl From<LeaseTable> for Vec<(LeaseKey, LeaseInfo)> {
    fn from(table: LeaseTable) -> Self {
        table.leases.into_iter().collect()
    }
}

impl From<BTreeMap<LeaseKey, LeaseInfo>> for LeaseTable {
    fn from(leases: BTreeMap<LeaseKey, LeaseInfo>) -> Self {
        Self { leases }
    }
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn get(&self, key: &LeaseKey) -> Option<&LeaseInfo> {
        self.leases.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LeaseKey, &LeaseInfo)> {
        self.leases.iter()
    }

    pub fn expired_at(&self, now: DateTime<Utc>) -> Vec<LeaseKey> {
        self.leases
            .iter()
            .filter(|(_, info)| !info.is_live_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Applies one command. Returns the transition to report, if any.
    pub fn apply(&mut self, request: &LeaseRequest) -> Result<Option<LeaseEvent>, LeaseError> {
        let at = request.at;
        match &request.command {
            LeaseCommand::Claim {
                key,
                holder,
                duration,
            } => {
                if holder.is_empty() {
                    return Err(LeaseError::EmptyHolder { key: key.clone() });
                }
                if let Some(existing) = self.leases.get(key) {
                    if existing.is_live_at(at) {
                        if existing.holder != *holder {
                            return Err(LeaseError::AlreadyHeld {
                                key: key.clone(),
                                holder: existing.holder.clone(),
                            });
                        }
                        self.leases.insert(
                            key.clone(),
                            LeaseInfo {
                                holder: holder.clone(),
                                start: at,
                                duration: *duration,
                            },
                        );
                        return Ok(None);
                    }
                }
                self.leases.insert(
                    key.clone(),
                    LeaseInfo {
                        holder: holder.clone(),
                        start: at,
                        duration: *duration,
                    },
                );
                Ok(Some(LeaseEvent::Claimed {
                    key: key.clone(),
                    holder: holder.clone(),
                }))
            }
            LeaseCommand::Extend {
                key,
                holder,
                duration,
            } => {
                if holder.is_empty() {
                    return Err(LeaseError::EmptyHolder { key: key.clone() });
                }
                let existing = match self.leases.get_mut(key) {
                    Some(info) if info.holder == *holder => info,
                    _ => {
                        return Err(LeaseError::NotHolder {
                            key: key.clone(),
                            holder: holder.clone(),
                        })
                    }
                };
                let extended = LeaseInfo {
                    holder: holder.clone(),
                    start: at,
                    duration: *duration,
                };
                // Extending never shortens a lease; `None` expiry is unbounded.
                let lengthens = match (existing.expiry(), extended.expiry()) {
                    (None, _) => false,
                    (Some(_), None) => true,
                    (Some(old), Some(new)) => new > old,
                };
                if lengthens {
                    *existing = extended;
                }
                Ok(None)
            }
            LeaseCommand::Expire { key } => match self.leases.remove(key) {
                Some(_) => Ok(Some(LeaseEvent::Expired { key: key.clone() })),
                None => Ok(None),
            },
            LeaseCommand::Revoke { key, holder } => match self.leases.get(key) {
                Some(info) if info.holder == *holder => {
                    self.leases.remove(key);
                    Ok(Some(LeaseEvent::Expired { key: key.clone() }))
                }
                _ => Err(LeaseError::NotHolder {
                    key: key.clone(),
                    holder: holder.clone(),
                }),
            },
        }
    }
}

/// Point-in-time copy of everything the state machine holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSnapshot {
    pub last_applied: Option<LogId<NodeId>>,
    pub membership: StoredMembership<NodeId, LeaseNode>,
    pub leases: LeaseTable,
}

impl LeaseSnapshot {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

/// Applies committed log entries to the lease table.
///
/// Entries at or below the last applied index are ignored, which keeps
/// replay after a snapshot restore from re-reporting transitions. Events go
/// to the notify target only while `leadership` says this node leads.
pub struct LeaseFsm {
    inner: RwLock<LeaseSnapshot>,
    target: Arc<dyn NotifyTarget>,
    leadership: Leadership,
}

impl LeaseFsm {
    pub fn new(target: Arc<dyn NotifyTarget>, leadership: Leadership) -> Self {
        Self {
            inner: RwLock::new(LeaseSnapshot::default()),
            target,
            leadership,
        }
    }

    pub fn leadership(&self) -> &Leadership {
        &self.leadership
    }

    pub fn apply(&self, entry: &Entry<TypeConfig>) -> LeaseResponse {
        let event = {
            let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());

            if state
                .last_applied
                .is_some_and(|applied| entry.log_id.index <= applied.index)
            {
                debug!("Skipping already applied entry {}", entry.log_id);
                return LeaseResponse::Applied;
            }
            state.last_applied = Some(entry.log_id);

            match &entry.payload {
                EntryPayload::Blank => return LeaseResponse::Applied,
                EntryPayload::Membership(membership) => {
                    state.membership = StoredMembership::new(Some(entry.log_id), membership.clone());
                    return LeaseResponse::Applied;
                }
                EntryPayload::Normal(request) => match state.leases.apply(request) {
                    Ok(event) => event,
                    Err(err) => {
                        debug!("Rejected {:?} at {}: {}", request.command, entry.log_id, err);
                        return LeaseResponse::Rejected(err);
                    }
                },
            }
        };

        if let Some(event) = event {
            self.notify(&event);
        }
        LeaseResponse::Applied
    }

    fn notify(&self, event: &LeaseEvent) {
        if !self.leadership.is_leader() {
            return;
        }
        if let Err(e) = dispatch(self.target.as_ref(), event) {
            warn!("Failed to notify lease transition {:?}: {:#}", event, e);
        }
    }

    pub fn snapshot(&self) -> LeaseSnapshot {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replaces the whole state in one step; readers see either the old or
    /// the new table, never a mix.
    pub fn restore(&self, snapshot: LeaseSnapshot) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    pub fn last_applied(&self) -> Option<LogId<NodeId>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).last_applied
    }

    pub fn membership(&self) -> StoredMembership<NodeId, LeaseNode> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .membership
            .clone()
    }

    pub fn table(&self) -> LeaseTable {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .leases
            .clone()
    }

    pub fn leases(&self) -> Vec<(LeaseKey, LeaseInfo)> {
        self.table().into()
    }

    pub fn lease(&self, key: &LeaseKey) -> Option<LeaseInfo> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .leases
            .get(key)
            .cloned()
    }

    pub fn expired_at(&self, now: DateTime<Utc>) -> Vec<LeaseKey> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .leases
            .expired_at(now)
    }
}
