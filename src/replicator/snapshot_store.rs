use crate::error::StoreError;
use crate::replicator::storage::LeaseNode;
use crate::types::NodeId;
use chrono::{DateTime, Utc};
use openraft::SnapshotMeta;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const META_FILE: &str = "meta.json";
const STATE_FILE: &str = "state.bin";
const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotFileMeta {
    meta: SnapshotMeta<NodeId, LeaseNode>,
    size: u64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub meta: SnapshotMeta<NodeId, LeaseNode>,
    pub data: Vec<u8>,
}

/// Directory of snapshots, one subdirectory per snapshot, keeping the
/// newest `retain` of them.
///
/// A snapshot is written into a `.tmp` directory, synced, then renamed into
/// place, so a crash mid-write never leaves a half-written snapshot visible.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    retain: usize,
}

impl SnapshotStore {
    pub fn open<P: AsRef<Path>>(dir: P, retain: usize) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.to_string_lossy().ends_with(TMP_SUFFIX) {
                warn!("Removing incomplete snapshot {:?}", path);
                fs::remove_dir_all(&path)?;
            }
        }

        Ok(Self {
            dir,
            retain: retain.max(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_name(meta: &SnapshotMeta<NodeId, LeaseNode>, created_at: DateTime<Utc>) -> String {
        let (term, index) = meta
            .last_log_id
            .map(|id| (id.leader_id.term, id.index))
            .unwrap_or((0, 0));
        format!("{}-{}-{}", term, index, created_at.timestamp_millis())
    }

    pub fn save(&self, meta: &SnapshotMeta<NodeId, LeaseNode>, data: &[u8]) -> Result<(), StoreError> {
        let created_at = Utc::now();
        let name = Self::snapshot_name(meta, created_at);
        let final_path = self.dir.join(&name);
        let tmp_path = self.dir.join(format!("{name}{TMP_SUFFIX}"));

        fs::create_dir_all(&tmp_path)?;

        let file_meta = SnapshotFileMeta {
            meta: meta.clone(),
            size: data.len() as u64,
            created_at,
        };
        let meta_bytes =
            serde_json::to_vec_pretty(&file_meta).map_err(|e| StoreError::Codec(e.to_string()))?;

        write_synced(&tmp_path.join(STATE_FILE), data)?;
        write_synced(&tmp_path.join(META_FILE), &meta_bytes)?;
        if final_path.exists() {
            fs::remove_dir_all(&final_path)?;
        }
        fs::rename(&tmp_path, &final_path)?;
        fs::File::open(&self.dir)?.sync_all()?;

        info!(
            "Saved snapshot {} ({} bytes, last log {:?})",
            name,
            data.len(),
            meta.last_log_id
        );

        self.reap()?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<StoredSnapshot, StoreError> {
        let meta_bytes = fs::read(path.join(META_FILE))?;
        let file_meta: SnapshotFileMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| StoreError::corrupt("snapshot metadata", path.display(), e))?;

        let data = fs::read(path.join(STATE_FILE))?;
        if data.len() as u64 != file_meta.size {
            return Err(StoreError::corrupt(
                "snapshot state",
                path.display(),
                format!("expected {} bytes, found {}", file_meta.size, data.len()),
            ));
        }

        Ok(StoredSnapshot {
            meta: file_meta.meta,
            data,
        })
    }

    /// Snapshot directories, newest first.
    fn snapshot_dirs(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut dirs: Vec<(u64, u64, i64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            match parse_snapshot_name(name) {
                Some((term, index, millis)) => dirs.push((index, term, millis, path)),
                None => debug!("Ignoring unexpected entry {:?} in snapshot dir", path),
            }
        }
        dirs.sort_by(|a, b| (b.0, b.1, b.2).cmp(&(a.0, a.1, a.2)));
        Ok(dirs.into_iter().map(|(_, _, _, path)| path).collect())
    }

    pub fn list(&self) -> Result<Vec<SnapshotMeta<NodeId, LeaseNode>>, StoreError> {
        let mut metas = Vec::new();
        for path in self.snapshot_dirs()? {
            match self.load(&path) {
                Ok(snapshot) => metas.push(snapshot.meta),
                Err(e) => warn!("Skipping unreadable snapshot {:?}: {}", path, e),
            }
        }
        Ok(metas)
    }

    /// The newest readable snapshot. Corrupt snapshots are skipped, so a
    /// store holding only damaged snapshots reads as empty.
    pub fn open_latest(&self) -> Result<Option<StoredSnapshot>, StoreError> {
        for path in self.snapshot_dirs()? {
            match self.load(&path) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => warn!("Skipping unreadable snapshot {:?}: {}", path, e),
            }
        }
        Ok(None)
    }

    fn reap(&self) -> Result<(), StoreError> {
        for path in self.snapshot_dirs()?.into_iter().skip(self.retain) {
            debug!("Reaping snapshot {:?}", path);
            fs::remove_dir_all(&path)?;
        }
        Ok(())
    }
}

fn write_synced(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

fn parse_snapshot_name(name: &str) -> Option<(u64, u64, i64)> {
    let mut parts = name.splitn(3, '-');
    let term = parts.next()?.parse().ok()?;
    let index = parts.next()?.parse().ok()?;
    let millis = parts.next()?.parse().ok()?;
    Some((term, index, millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot_name() {
        assert_eq!(parse_snapshot_name("3-120-1700000000000"), Some((3, 120, 1700000000000)));
        assert_eq!(parse_snapshot_name("3-120"), None);
        assert_eq!(parse_snapshot_name("not-a-snapshot"), None);
    }
}
