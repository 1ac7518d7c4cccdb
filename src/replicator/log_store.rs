use crate::error::StoreError;
use crate::replicator::storage::{LeaseNode, TypeConfig};
use crate::types::NodeId;
use openraft::{Entry, EntryPayload, LogId, Membership, Vote};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const KEY_VOTE: &[u8] = b"vote";
const KEY_COMMITTED: &[u8] = b"committed";
const KEY_LAST_PURGED: &[u8] = b"last_purged";
const KEY_LOCAL_ID: &[u8] = b"local_id";

const OPEN_ATTEMPTS: u32 = 50;
const OPEN_BACKOFF: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Every append and metadata write blocks on a flush to disk.
    #[default]
    SyncAfterWrite,
    /// Writes are flushed by sled's background flusher.
    NoSync,
}

/// Durable, append-only raft log backed by sled.
///
/// Entries are keyed by big-endian index so tree order is log order. A store
/// is released with [`LogStore::close`]; continuing afterwards requires
/// opening a new one.
pub struct LogStore {
    db: sled::Db,
    log_tree: sled::Tree,
    meta_tree: sled::Tree,
    sync: SyncPolicy,
}

impl LogStore {
    pub fn open<P: AsRef<Path>>(path: P, sync: SyncPolicy) -> Result<Self, StoreError> {
        let flush_every_ms = match sync {
            SyncPolicy::SyncAfterWrite => None,
            SyncPolicy::NoSync => Some(500),
        };
        let config = sled::Config::new()
            .path(path.as_ref())
            .flush_every_ms(flush_every_ms);
        let db = Self::open_db(&config)?;
        let log_tree = db.open_tree("raft_log")?;
        let meta_tree = db.open_tree("raft_meta")?;

        debug!(
            "Opened log store at {:?} ({} entries, {:?})",
            path.as_ref(),
            log_tree.len(),
            sync
        );

        Ok(Self {
            db,
            log_tree,
            meta_tree,
            sync,
        })
    }

    /// sled's background threads can hold the file lock for a moment after
    /// the previous handle on the same path is dropped.
    fn open_db(config: &sled::Config) -> Result<sled::Db, StoreError> {
        let mut attempt = 1;
        loop {
            match config.open() {
                Ok(db) => return Ok(db),
                Err(sled::Error::Io(e)) if attempt < OPEN_ATTEMPTS && is_lock_contention(&e) => {
                    debug!("Log store still locked (attempt {}): {}", attempt, e);
                    attempt += 1;
                    std::thread::sleep(OPEN_BACKOFF);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn log_key(index: u64) -> [u8; 8] {
        index.to_be_bytes()
    }

    fn index_of(key: &[u8]) -> Result<u64, StoreError> {
        let bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| StoreError::corrupt("log key", format!("{key:?}"), "not 8 bytes"))?;
        Ok(u64::from_be_bytes(bytes))
    }

    fn decode_entry(index: u64, value: &[u8]) -> Result<Entry<TypeConfig>, StoreError> {
        serde_json::from_slice(value).map_err(|e| StoreError::corrupt("log entry", index, e))
    }

    fn sync_if_required(&self) -> Result<(), StoreError> {
        if self.sync == SyncPolicy::SyncAfterWrite {
            self.db.flush()?;
        }
        Ok(())
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        self.sync
    }

    /// Appends entries after the current tail. Indices must continue the log
    /// without gaps; an empty log accepts any starting index.
    pub fn append<I>(&self, entries: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = Entry<TypeConfig>>,
    {
        let mut next = match self.last_index()? {
            Some(last) => Some(last + 1),
            None => self.last_purged()?.map(|p| p.index + 1),
        };

        let mut batch = sled::Batch::default();
        let mut count = 0usize;
        for entry in entries {
            let index = entry.log_id.index;
            if let Some(expected) = next {
                if index != expected {
                    return Err(StoreError::Gap {
                        expected,
                        got: index,
                    });
                }
            }
            let value = serde_json::to_vec(&entry).map_err(|e| StoreError::Codec(e.to_string()))?;
            batch.insert(Self::log_key(index).to_vec(), value);
            next = Some(index + 1);
            count += 1;
        }

        if count == 0 {
            return Ok(());
        }

        self.log_tree.apply_batch(batch)?;
        self.sync_if_required()?;
        debug!("Appended {} entries, next index {:?}", count, next);
        Ok(())
    }

    pub fn get(&self, index: u64) -> Result<Option<Entry<TypeConfig>>, StoreError> {
        match self.log_tree.get(Self::log_key(index))? {
            Some(value) => Self::decode_entry(index, &value).map(Some),
            None => Ok(None),
        }
    }

    /// Entries in `[start, end)`; `end == None` reads to the tail.
    pub fn range(&self, start: u64, end: Option<u64>) -> Result<Vec<Entry<TypeConfig>>, StoreError> {
        let mut entries = Vec::new();
        for item in self.log_tree.range(Self::log_key(start)..) {
            let (key, value) = item?;
            let index = Self::index_of(&key)?;
            if end.is_some_and(|e| index >= e) {
                break;
            }
            entries.push(Self::decode_entry(index, &value)?);
        }
        Ok(entries)
    }

    pub fn first_index(&self) -> Result<Option<u64>, StoreError> {
        match self.log_tree.first()? {
            Some((key, _)) => Self::index_of(&key).map(Some),
            None => Ok(None),
        }
    }

    pub fn last_index(&self) -> Result<Option<u64>, StoreError> {
        match self.log_tree.last()? {
            Some((key, _)) => Self::index_of(&key).map(Some),
            None => Ok(None),
        }
    }

    pub fn last_entry(&self) -> Result<Option<Entry<TypeConfig>>, StoreError> {
        match self.log_tree.last()? {
            Some((key, value)) => {
                let index = Self::index_of(&key)?;
                Self::decode_entry(index, &value).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.log_tree.is_empty()
    }

    /// Removes every entry at or after `index`.
    pub fn truncate_from(&self, index: u64) -> Result<(), StoreError> {
        let keys: Vec<_> = self
            .log_tree
            .range(Self::log_key(index)..)
            .keys()
            .collect::<Result<_, _>>()?;

        let removed = keys.len();
        let mut batch = sled::Batch::default();
        for key in keys {
            batch.remove(key);
        }
        self.log_tree.apply_batch(batch)?;
        self.sync_if_required()?;
        debug!("Truncated {} entries from index {}", removed, index);
        Ok(())
    }

    /// Records `log_id` as purged and removes every entry up to and
    /// including it.
    pub fn purge_upto(&self, log_id: &LogId<NodeId>) -> Result<(), StoreError> {
        self.put_meta(KEY_LAST_PURGED, log_id)?;

        let keys: Vec<_> = self
            .log_tree
            .range(..=Self::log_key(log_id.index))
            .keys()
            .collect::<Result<_, _>>()?;

        let removed = keys.len();
        let mut batch = sled::Batch::default();
        for key in keys {
            batch.remove(key);
        }
        self.log_tree.apply_batch(batch)?;
        self.sync_if_required()?;
        debug!("Purged {} entries up to {}", removed, log_id);
        Ok(())
    }

    /// The most recent membership entry in the log, if any.
    pub fn configuration(
        &self,
    ) -> Result<Option<(LogId<NodeId>, Membership<NodeId, LeaseNode>)>, StoreError> {
        for item in self.log_tree.iter().rev() {
            let (key, value) = item?;
            let index = Self::index_of(&key)?;
            let entry = Self::decode_entry(index, &value)?;
            if let EntryPayload::Membership(membership) = entry.payload {
                return Ok(Some((entry.log_id, membership)));
            }
        }
        Ok(None)
    }

    pub fn has_configuration(&self) -> Result<bool, StoreError> {
        Ok(self.configuration()?.is_some())
    }

    pub fn has_commands(&self) -> Result<bool, StoreError> {
        for item in self.log_tree.iter() {
            let (key, value) = item?;
            let index = Self::index_of(&key)?;
            if matches!(
                Self::decode_entry(index, &value)?.payload,
                EntryPayload::Normal(_)
            ) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn get_meta<T: DeserializeOwned>(&self, key: &'static [u8]) -> Result<Option<T>, StoreError> {
        match self.meta_tree.get(key)? {
            Some(value) => bincode::deserialize(&value)
                .map(Some)
                .map_err(|e| StoreError::corrupt("log metadata", String::from_utf8_lossy(key), e)),
            None => Ok(None),
        }
    }

    fn put_meta<T: Serialize>(&self, key: &'static [u8], value: &T) -> Result<(), StoreError> {
        let data = bincode::serialize(value).map_err(|e| StoreError::Codec(e.to_string()))?;
        self.meta_tree.insert(key, data)?;
        self.sync_if_required()
    }

    pub fn vote(&self) -> Result<Option<Vote<NodeId>>, StoreError> {
        self.get_meta(KEY_VOTE)
    }

    pub fn save_vote(&self, vote: &Vote<NodeId>) -> Result<(), StoreError> {
        self.put_meta(KEY_VOTE, vote)
    }

    pub fn committed(&self) -> Result<Option<LogId<NodeId>>, StoreError> {
        self.get_meta::<Option<LogId<NodeId>>>(KEY_COMMITTED)
            .map(Option::flatten)
    }

    pub fn save_committed(&self, committed: Option<LogId<NodeId>>) -> Result<(), StoreError> {
        self.put_meta(KEY_COMMITTED, &committed)
    }

    pub fn last_purged(&self) -> Result<Option<LogId<NodeId>>, StoreError> {
        self.get_meta(KEY_LAST_PURGED)
    }

    pub fn local_id(&self) -> Result<Option<NodeId>, StoreError> {
        self.get_meta(KEY_LOCAL_ID)
    }

    pub fn save_local_id(&self, id: NodeId) -> Result<(), StoreError> {
        self.put_meta(KEY_LOCAL_ID, &id)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Flushes outstanding writes and releases the underlying database.
    pub fn close(self) -> Result<(), StoreError> {
        self.db.flush()?;
        debug!("Closed log store");
        Ok(())
    }
}

fn is_lock_contention(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.to_string().contains("could not acquire lock")
}
