use crate::error::StoreError;
use crate::replicator::log_store::LogStore;
use crate::replicator::snapshot_store::SnapshotStore;
use crate::replicator::state_machine::{LeaseFsm, LeaseSnapshot};
use crate::types::{LeaseRequest, LeaseResponse, NodeId};
use chrono::Utc;
use openraft::storage::{Adaptor, LogState, RaftStorage};
use openraft::{
    Entry, ErrorSubject, ErrorVerb, LogId, OptionalSend, RaftLogReader, RaftSnapshotBuilder,
    Snapshot, SnapshotMeta, StorageError, StoredMembership, Vote,
};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::io::Cursor;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;
use tracing::info;

openraft::declare_raft_types!(
    pub TypeConfig:
        D = LeaseRequest,
        R = LeaseResponse,
        Node = LeaseNode,
);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LeaseNode {
    pub addr: String,
}

impl LeaseNode {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl std::fmt::Display for LeaseNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// openraft storage over the sled log, the snapshot directory and the lease
/// state machine. Clones share all three.
#[derive(Clone)]
pub struct LeaseStore {
    log: Arc<LogStore>,
    snapshots: Arc<SnapshotStore>,
    fsm: Arc<LeaseFsm>,
}

impl LeaseStore {
    /// Restores the state machine from the newest snapshot before handing the
    /// store to raft.
    pub fn new(
        log: Arc<LogStore>,
        snapshots: Arc<SnapshotStore>,
        fsm: Arc<LeaseFsm>,
    ) -> Result<Self, StoreError> {
        if let Some(snapshot) = snapshots.open_latest()? {
            let state = LeaseSnapshot::from_bytes(&snapshot.data).map_err(|e| {
                StoreError::corrupt("snapshot state", &snapshot.meta.snapshot_id, e)
            })?;
            info!(
                "Restored {} leases from snapshot {}",
                state.leases.len(),
                snapshot.meta.snapshot_id
            );
            fsm.restore(state);
        }

        Ok(Self {
            log,
            snapshots,
            fsm,
        })
    }

    pub fn fsm(&self) -> &Arc<LeaseFsm> {
        &self.fsm
    }

    pub fn log(&self) -> &Arc<LogStore> {
        &self.log
    }
}

fn log_err(verb: ErrorVerb) -> impl FnOnce(StoreError) -> StorageError<NodeId> {
    move |e| e.into_storage_error(ErrorSubject::Logs, verb)
}

fn store_err(verb: ErrorVerb) -> impl FnOnce(StoreError) -> StorageError<NodeId> {
    move |e| e.into_storage_error(ErrorSubject::Store, verb)
}

impl RaftLogReader<TypeConfig> for LeaseStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s + 1,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => Some(e + 1),
            Bound::Excluded(&e) => Some(e),
            Bound::Unbounded => None,
        };

        self.log.range(start, end).map_err(log_err(ErrorVerb::Read))
    }
}

impl RaftSnapshotBuilder<TypeConfig> for LeaseStore {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let state = self.fsm.snapshot();
        let data = state.to_bytes().map_err(|e| {
            StoreError::Codec(e.to_string())
                .into_storage_error(ErrorSubject::StateMachine, ErrorVerb::Read)
        })?;

        let snapshot_id = format!(
            "{}-{}-{}",
            state
                .last_applied
                .map(|l| l.leader_id.to_string())
                .unwrap_or_default(),
            state.last_applied.map(|l| l.index).unwrap_or(0),
            Utc::now().timestamp_millis()
        );

        let meta = SnapshotMeta {
            last_log_id: state.last_applied,
            last_membership: state.membership.clone(),
            snapshot_id,
        };

        self.snapshots.save(&meta, &data).map_err(|e| {
            e.into_storage_error(ErrorSubject::Snapshot(Some(meta.signature())), ErrorVerb::Write)
        })?;

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStorage<TypeConfig> for LeaseStore {
    type LogReader = Self;
    type SnapshotBuilder = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let last_purged = self.log.last_purged().map_err(log_err(ErrorVerb::Read))?;
        let last_log_id = self
            .log
            .last_entry()
            .map_err(log_err(ErrorVerb::Read))?
            .map(|e| e.log_id)
            .or(last_purged);

        Ok(LogState {
            last_purged_log_id: last_purged,
            last_log_id,
        })
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        self.log
            .save_vote(vote)
            .map_err(|e| e.into_storage_error(ErrorSubject::Vote, ErrorVerb::Write))
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        self.log
            .vote()
            .map_err(|e| e.into_storage_error(ErrorSubject::Vote, ErrorVerb::Read))
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<NodeId>>,
    ) -> Result<(), StorageError<NodeId>> {
        self.log
            .save_committed(committed)
            .map_err(store_err(ErrorVerb::Write))
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<NodeId>>, StorageError<NodeId>> {
        self.log.committed().map_err(store_err(ErrorVerb::Read))
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn append_to_log<I>(&mut self, entries: I) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
    {
        self.log.append(entries).map_err(log_err(ErrorVerb::Write))
    }

    async fn delete_conflict_logs_since(
        &mut self,
        log_id: LogId<NodeId>,
    ) -> Result<(), StorageError<NodeId>> {
        self.log
            .truncate_from(log_id.index)
            .map_err(log_err(ErrorVerb::Delete))
    }

    async fn purge_logs_upto(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        self.log
            .purge_upto(&log_id)
            .map_err(log_err(ErrorVerb::Delete))
    }

    async fn last_applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, LeaseNode>), StorageError<NodeId>>
    {
        Ok((self.fsm.last_applied(), self.fsm.membership()))
    }

    async fn apply_to_state_machine(
        &mut self,
        entries: &[Entry<TypeConfig>],
    ) -> Result<Vec<LeaseResponse>, StorageError<NodeId>> {
        Ok(entries.iter().map(|entry| self.fsm.apply(entry)).collect())
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, LeaseNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        let data = snapshot.into_inner();
        let state = LeaseSnapshot::from_bytes(&data).map_err(|e| {
            StorageError::from_io_error(
                ErrorSubject::Snapshot(Some(meta.signature())),
                ErrorVerb::Read,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;

        self.snapshots.save(meta, &data).map_err(|e| {
            e.into_storage_error(ErrorSubject::Snapshot(Some(meta.signature())), ErrorVerb::Write)
        })?;

        info!(
            "Installed snapshot {} with {} leases",
            meta.snapshot_id,
            state.leases.len()
        );
        self.fsm.restore(state);
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        let latest = self
            .snapshots
            .open_latest()
            .map_err(|e| e.into_storage_error(ErrorSubject::Snapshot(None), ErrorVerb::Read))?;

        Ok(latest.map(|s| Snapshot {
            meta: s.meta,
            snapshot: Box::new(Cursor::new(s.data)),
        }))
    }
}

pub type LeaseLogStore = Adaptor<TypeConfig, LeaseStore>;
pub type LeaseStateMachine = Adaptor<TypeConfig, LeaseStore>;

pub fn create_storage(store: LeaseStore) -> (LeaseLogStore, LeaseStateMachine) {
    Adaptor::new(store)
}
