use openraft::{CommittedLeaderId, LogId, SnapshotMeta, StoredMembership};
use raftlease::replicator::snapshot_store::*;
use tempfile::tempdir;

fn meta(term: u64, index: u64) -> SnapshotMeta<u64, raftlease::replicator::LeaseNode> {
    SnapshotMeta {
        last_log_id: Some(LogId::new(CommittedLeaderId::new(term, 1), index)),
        last_membership: StoredMembership::default(),
        snapshot_id: format!("{term}-{index}"),
    }
}

#[test]
fn test_empty_store_has_no_snapshot() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::open(dir.path(), 1).unwrap();

    assert!(store.open_latest().unwrap().is_none());
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn test_save_and_open_latest() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::open(dir.path(), 2).unwrap();

    store.save(&meta(1, 10), b"ten").unwrap();
    store.save(&meta(2, 20), b"twenty").unwrap();

    let latest = store.open_latest().unwrap().unwrap();
    assert_eq!(latest.meta, meta(2, 20));
    assert_eq!(latest.data, b"twenty");
}

#[test]
fn test_retains_newest() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::open(dir.path(), 2).unwrap();

    for index in [10, 20, 30] {
        store.save(&meta(1, index), b"state").unwrap();
    }

    let indexes: Vec<u64> = store
        .list()
        .unwrap()
        .iter()
        .map(|m| m.last_log_id.unwrap().index)
        .collect();
    assert_eq!(indexes, vec![30, 20]);
}

#[test]
fn test_skips_corrupt_snapshot() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::open(dir.path(), 3).unwrap();

    store.save(&meta(1, 10), b"good").unwrap();
    store.save(&meta(1, 20), b"damaged").unwrap();

    let newest = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.file_name().unwrap().to_string_lossy().starts_with("1-20-"))
        .unwrap();
    std::fs::write(newest.join("state.bin"), b"dam").unwrap();

    let latest = store.open_latest().unwrap().unwrap();
    assert_eq!(latest.meta, meta(1, 10));
    assert_eq!(latest.data, b"good");
}

#[test]
fn test_open_discards_incomplete_writes() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("1-5-1700000000000.tmp")).unwrap();

    let store = SnapshotStore::open(dir.path(), 1).unwrap();

    assert!(!dir.path().join("1-5-1700000000000.tmp").exists());
    assert!(store.open_latest().unwrap().is_none());
}
