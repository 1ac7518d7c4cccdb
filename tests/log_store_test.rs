use chrono::Utc;
use openraft::{CommittedLeaderId, Entry, EntryPayload, LogId, Vote};
use raftlease::replicator::log_store::*;
use raftlease::replicator::storage::TypeConfig;
use raftlease::*;
use std::time::Duration;
use tempfile::tempdir;

fn normal(term: u64, index: u64) -> Entry<TypeConfig> {
    Entry {
        log_id: LogId::new(CommittedLeaderId::new(term, 1), index),
        payload: EntryPayload::Normal(LeaseRequest::new(
            LeaseCommand::Claim {
                key: LeaseKey::new("ns", "model", format!("lease-{index}")),
                holder: "unit/0".to_string(),
                duration: Duration::from_secs(30),
            },
            Utc::now(),
        )),
    }
}

fn blank(term: u64, index: u64) -> Entry<TypeConfig> {
    Entry {
        log_id: LogId::new(CommittedLeaderId::new(term, 1), index),
        payload: EntryPayload::Blank,
    }
}

#[test]
fn test_empty_store() {
    let dir = tempdir().unwrap();
    let store = LogStore::open(dir.path().join("logs"), SyncPolicy::SyncAfterWrite).unwrap();

    assert!(store.is_empty());
    assert_eq!(store.first_index().unwrap(), None);
    assert_eq!(store.last_index().unwrap(), None);
    assert!(store.get(1).unwrap().is_none());
    assert!(store.vote().unwrap().is_none());
    assert!(store.committed().unwrap().is_none());
    assert!(!store.has_configuration().unwrap());
    store.close().unwrap();
}

#[test]
fn test_append_and_read() {
    let dir = tempdir().unwrap();
    let store = LogStore::open(dir.path(), SyncPolicy::SyncAfterWrite).unwrap();

    store
        .append(vec![blank(1, 1), normal(1, 2), normal(1, 3)])
        .unwrap();

    assert_eq!(store.first_index().unwrap(), Some(1));
    assert_eq!(store.last_index().unwrap(), Some(3));
    assert_eq!(store.get(2).unwrap().unwrap().log_id.index, 2);
    assert_eq!(store.range(2, None).unwrap().len(), 2);
    assert_eq!(store.range(1, Some(3)).unwrap().len(), 2);
    assert!(store.has_commands().unwrap());
}

#[test]
fn test_append_rejects_gap() {
    let dir = tempdir().unwrap();
    let store = LogStore::open(dir.path(), SyncPolicy::NoSync).unwrap();

    store.append(vec![blank(1, 1)]).unwrap();
    let err = store.append(vec![normal(1, 3)]).unwrap_err();

    assert!(matches!(err, StoreError::Gap { expected: 2, got: 3 }));
    assert_eq!(store.last_index().unwrap(), Some(1));
}

#[test]
fn test_truncate_and_purge() {
    let dir = tempdir().unwrap();
    let store = LogStore::open(dir.path(), SyncPolicy::SyncAfterWrite).unwrap();
    store
        .append((1..=5).map(|i| normal(1, i)))
        .unwrap();

    store.truncate_from(4).unwrap();
    assert_eq!(store.last_index().unwrap(), Some(3));

    let purged = LogId::new(CommittedLeaderId::new(1, 1), 2);
    store.purge_upto(&purged).unwrap();
    assert_eq!(store.first_index().unwrap(), Some(3));
    assert_eq!(store.last_purged().unwrap(), Some(purged));

    store.truncate_from(3).unwrap();
    assert!(store.is_empty());
    assert!(matches!(
        store.append(vec![normal(1, 5)]),
        Err(StoreError::Gap { expected: 3, got: 5 })
    ));
    store.append(vec![normal(2, 3)]).unwrap();
}

#[test]
fn test_metadata_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("logs");

    let vote = Vote::new(3, 7);
    let committed = LogId::new(CommittedLeaderId::new(3, 7), 2);
    {
        let store = LogStore::open(&path, SyncPolicy::SyncAfterWrite).unwrap();
        store.append(vec![blank(3, 1), normal(3, 2)]).unwrap();
        store.save_vote(&vote).unwrap();
        store.save_committed(Some(committed)).unwrap();
        store.save_local_id(7).unwrap();
        store.close().unwrap();
    }

    let store = LogStore::open(&path, SyncPolicy::SyncAfterWrite).unwrap();
    assert_eq!(store.vote().unwrap(), Some(vote));
    assert_eq!(store.committed().unwrap(), Some(committed));
    assert_eq!(store.local_id().unwrap(), Some(7));
    assert_eq!(store.last_index().unwrap(), Some(2));
}

#[test]
fn test_reopen_empty_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("logs");

    LogStore::open(&path, SyncPolicy::SyncAfterWrite)
        .unwrap()
        .close()
        .unwrap();

    let store = LogStore::open(&path, SyncPolicy::SyncAfterWrite).unwrap();
    assert!(store.is_empty());
    store.append(vec![blank(1, 1)]).unwrap();
    assert_eq!(store.last_index().unwrap(), Some(1));
}

#[test]
fn test_reopen_immediately_after_close() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("logs");

    for round in 0..100u64 {
        let store = LogStore::open(&path, SyncPolicy::SyncAfterWrite).unwrap();
        let first = round * 5 + 1;
        store.append((first..first + 5).map(|i| normal(1, i))).unwrap();
        store
            .purge_upto(&LogId::new(CommittedLeaderId::new(1, 1), first + 2))
            .unwrap();
        store.close().unwrap();
    }

    let store = LogStore::open(&path, SyncPolicy::SyncAfterWrite).unwrap();
    assert_eq!(store.first_index().unwrap(), Some(499));
    assert_eq!(store.last_index().unwrap(), Some(500));
}
