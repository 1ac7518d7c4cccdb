use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use openraft::{CommittedLeaderId, Entry, EntryPayload, LogId};
use raftlease::replicator::notify::{ChannelTarget, Leadership, NoopTarget};
use raftlease::replicator::state_machine::*;
use raftlease::replicator::storage::TypeConfig;
use raftlease::*;
use std::sync::Arc;
use std::time::Duration;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn key(lease: &str) -> LeaseKey {
    LeaseKey::new("application-leadership", "model-uuid", lease)
}

fn claim(lease: &str, holder: &str, secs: u64) -> LeaseCommand {
    LeaseCommand::Claim {
        key: key(lease),
        holder: holder.to_string(),
        duration: Duration::from_secs(secs),
    }
}

fn entry(index: u64, command: LeaseCommand, at: DateTime<Utc>) -> Entry<TypeConfig> {
    Entry {
        log_id: LogId::new(CommittedLeaderId::new(2, 1), index),
        payload: EntryPayload::Normal(LeaseRequest::new(command, at)),
    }
}

fn leader_fsm() -> (LeaseFsm, tokio::sync::mpsc::UnboundedReceiver<LeaseEvent>) {
    let (target, rx) = ChannelTarget::new();
    (LeaseFsm::new(Arc::new(target), Leadership::leader()), rx)
}

#[test]
fn test_lease_table_new() {
    let table = LeaseTable::new();
    assert!(table.is_empty());
    assert_eq!(table.len(), 0);
}

#[test]
fn test_claim_then_expire() {
    let (fsm, mut rx) = leader_fsm();

    let resp = fsm.apply(&entry(2, claim("mysql", "mysql/0", 60), t0()));
    assert_eq!(resp, LeaseResponse::Applied);
    assert_eq!(fsm.lease(&key("mysql")).unwrap().holder, "mysql/0");

    let resp = fsm.apply(&entry(
        3,
        LeaseCommand::Expire { key: key("mysql") },
        t0() + ChronoDuration::seconds(61),
    ));
    assert_eq!(resp, LeaseResponse::Applied);
    assert!(fsm.lease(&key("mysql")).is_none());

    assert_eq!(
        rx.try_recv().unwrap(),
        LeaseEvent::Claimed {
            key: key("mysql"),
            holder: "mysql/0".to_string()
        }
    );
    assert_eq!(rx.try_recv().unwrap(), LeaseEvent::Expired { key: key("mysql") });
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_conflicting_claim_keeps_holder() {
    let (fsm, mut rx) = leader_fsm();

    fsm.apply(&entry(2, claim("mysql", "mysql/0", 60), t0()));
    let resp = fsm.apply(&entry(
        3,
        claim("mysql", "mysql/1", 60),
        t0() + ChronoDuration::seconds(10),
    ));

    assert_eq!(
        resp,
        LeaseResponse::Rejected(LeaseError::AlreadyHeld {
            key: key("mysql"),
            holder: "mysql/0".to_string(),
        })
    );
    assert_eq!(fsm.lease(&key("mysql")).unwrap().holder, "mysql/0");

    rx.try_recv().unwrap();
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_claim_after_expiry_succeeds() {
    let (fsm, _rx) = leader_fsm();

    fsm.apply(&entry(2, claim("mysql", "mysql/0", 60), t0()));
    let resp = fsm.apply(&entry(
        3,
        claim("mysql", "mysql/1", 60),
        t0() + ChronoDuration::seconds(60),
    ));

    assert_eq!(resp, LeaseResponse::Applied);
    assert_eq!(fsm.lease(&key("mysql")).unwrap().holder, "mysql/1");
}

#[test]
fn test_reclaim_by_holder_refreshes_without_notifying() {
    let (fsm, mut rx) = leader_fsm();

    fsm.apply(&entry(2, claim("mysql", "mysql/0", 60), t0()));
    rx.try_recv().unwrap();

    let later = t0() + ChronoDuration::seconds(30);
    assert_eq!(
        fsm.apply(&entry(3, claim("mysql", "mysql/0", 60), later)),
        LeaseResponse::Applied
    );
    assert_eq!(fsm.lease(&key("mysql")).unwrap().start, later);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_extend_requires_holder() {
    let (fsm, _rx) = leader_fsm();
    fsm.apply(&entry(2, claim("mysql", "mysql/0", 60), t0()));

    let resp = fsm.apply(&entry(
        3,
        LeaseCommand::Extend {
            key: key("mysql"),
            holder: "mysql/1".to_string(),
            duration: Duration::from_secs(60),
        },
        t0(),
    ));
    assert!(matches!(
        resp,
        LeaseResponse::Rejected(LeaseError::NotHolder { .. })
    ));

    let resp = fsm.apply(&entry(
        4,
        LeaseCommand::Extend {
            key: key("absent"),
            holder: "mysql/0".to_string(),
            duration: Duration::from_secs(60),
        },
        t0(),
    ));
    assert!(matches!(
        resp,
        LeaseResponse::Rejected(LeaseError::NotHolder { .. })
    ));
}

#[test]
fn test_empty_holder_rejected() {
    let (fsm, mut rx) = leader_fsm();

    let resp = fsm.apply(&entry(2, claim("mysql", "", 60), t0()));
    assert_eq!(
        resp,
        LeaseResponse::Rejected(LeaseError::EmptyHolder { key: key("mysql") })
    );
    assert!(fsm.lease(&key("mysql")).is_none());

    fsm.apply(&entry(3, claim("mysql", "mysql/0", 60), t0()));
    let resp = fsm.apply(&entry(
        4,
        LeaseCommand::Extend {
            key: key("mysql"),
            holder: String::new(),
            duration: Duration::from_secs(600),
        },
        t0(),
    ));
    assert_eq!(
        resp,
        LeaseResponse::Rejected(LeaseError::EmptyHolder { key: key("mysql") })
    );
    assert_eq!(fsm.lease(&key("mysql")).unwrap().holder, "mysql/0");

    let mut table = LeaseTable::new();
    assert!(table
        .apply(&LeaseRequest::new(claim("redis", "", 30), t0()))
        .is_err());
    assert!(table.is_empty());

    assert_eq!(
        rx.try_recv().unwrap(),
        LeaseEvent::Claimed {
            key: key("mysql"),
            holder: "mysql/0".to_string()
        }
    );
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_extend_never_shortens() {
    let (fsm, _rx) = leader_fsm();
    fsm.apply(&entry(2, claim("mysql", "mysql/0", 60), t0()));

    fsm.apply(&entry(
        3,
        LeaseCommand::Extend {
            key: key("mysql"),
            holder: "mysql/0".to_string(),
            duration: Duration::from_secs(10),
        },
        t0() + ChronoDuration::seconds(5),
    ));
    assert_eq!(
        fsm.lease(&key("mysql")).unwrap().expiry(),
        Some(t0() + ChronoDuration::seconds(60))
    );

    fsm.apply(&entry(
        4,
        LeaseCommand::Extend {
            key: key("mysql"),
            holder: "mysql/0".to_string(),
            duration: Duration::from_secs(120),
        },
        t0() + ChronoDuration::seconds(5),
    ));
    assert_eq!(
        fsm.lease(&key("mysql")).unwrap().expiry(),
        Some(t0() + ChronoDuration::seconds(125))
    );
}

#[test]
fn test_expire_absent_is_noop() {
    let (fsm, mut rx) = leader_fsm();

    let resp = fsm.apply(&entry(2, LeaseCommand::Expire { key: key("mysql") }, t0()));
    assert_eq!(resp, LeaseResponse::Applied);
    assert!(fsm.table().is_empty());
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_revoke() {
    let (fsm, mut rx) = leader_fsm();
    fsm.apply(&entry(2, claim("mysql", "mysql/0", 60), t0()));
    rx.try_recv().unwrap();

    let resp = fsm.apply(&entry(
        3,
        LeaseCommand::Revoke {
            key: key("mysql"),
            holder: "mysql/1".to_string(),
        },
        t0(),
    ));
    assert!(matches!(
        resp,
        LeaseResponse::Rejected(LeaseError::NotHolder { .. })
    ));
    assert!(fsm.lease(&key("mysql")).is_some());

    let resp = fsm.apply(&entry(
        4,
        LeaseCommand::Revoke {
            key: key("mysql"),
            holder: "mysql/0".to_string(),
        },
        t0(),
    ));
    assert_eq!(resp, LeaseResponse::Applied);
    assert!(fsm.lease(&key("mysql")).is_none());
    assert_eq!(rx.try_recv().unwrap(), LeaseEvent::Expired { key: key("mysql") });
}

#[test]
fn test_follower_does_not_notify() {
    let (target, mut rx) = ChannelTarget::new();
    let leadership = Leadership::new();
    let fsm = LeaseFsm::new(Arc::new(target), leadership.clone());

    fsm.apply(&entry(2, claim("mysql", "mysql/0", 60), t0()));
    assert!(fsm.lease(&key("mysql")).is_some());
    assert!(rx.try_recv().is_err());

    leadership.set(true);
    fsm.apply(&entry(3, LeaseCommand::Expire { key: key("mysql") }, t0()));
    assert_eq!(rx.try_recv().unwrap(), LeaseEvent::Expired { key: key("mysql") });
}

#[test]
fn test_notify_failure_does_not_roll_back() {
    let (target, rx) = ChannelTarget::new();
    drop(rx);
    let fsm = LeaseFsm::new(Arc::new(target), Leadership::leader());

    let resp = fsm.apply(&entry(2, claim("mysql", "mysql/0", 60), t0()));
    assert_eq!(resp, LeaseResponse::Applied);
    assert!(fsm.lease(&key("mysql")).is_some());
}

#[test]
fn test_deterministic_replay() {
    let commands = vec![
        entry(2, claim("mysql", "mysql/0", 60), t0()),
        entry(3, claim("wordpress", "wordpress/2", 30), t0()),
        entry(4, claim("mysql", "mysql/1", 60), t0() + ChronoDuration::seconds(1)),
        entry(
            5,
            LeaseCommand::Extend {
                key: key("wordpress"),
                holder: "wordpress/2".to_string(),
                duration: Duration::from_secs(90),
            },
            t0() + ChronoDuration::seconds(2),
        ),
        entry(
            6,
            LeaseCommand::Expire { key: key("mysql") },
            t0() + ChronoDuration::seconds(61),
        ),
        entry(7, claim("redis", "redis/0", 10), t0() + ChronoDuration::seconds(62)),
    ];

    let a = LeaseFsm::new(Arc::new(NoopTarget), Leadership::leader());
    let b = LeaseFsm::new(Arc::new(NoopTarget), Leadership::new());
    for e in &commands {
        a.apply(e);
    }
    for e in &commands {
        b.apply(e);
    }

    assert_eq!(a.table(), b.table());
    assert_eq!(
        a.snapshot().to_bytes().unwrap(),
        b.snapshot().to_bytes().unwrap()
    );
    assert_eq!(a.table().len(), 2);
}

#[test]
fn test_restore_then_replay_does_not_renotify() {
    let (source, _rx) = leader_fsm();
    let claimed = entry(2, claim("mysql", "mysql/0", 60), t0());
    source.apply(&claimed);
    let snapshot = source.snapshot();

    let (restored, mut rx) = leader_fsm();
    restored.restore(LeaseSnapshot::from_bytes(&snapshot.to_bytes().unwrap()).unwrap());
    assert_eq!(restored.last_applied().map(|l| l.index), Some(2));

    restored.apply(&claimed);
    assert!(rx.try_recv().is_err());
    assert_eq!(restored.table(), source.table());

    restored.apply(&entry(3, LeaseCommand::Expire { key: key("mysql") }, t0()));
    assert_eq!(rx.try_recv().unwrap(), LeaseEvent::Expired { key: key("mysql") });
}

#[test]
fn test_membership_entry_recorded() {
    let (fsm, _rx) = leader_fsm();
    let servers = vec![ServerConfig {
        id: 1,
        address: "a:17070".to_string(),
        suffrage: Suffrage::Voter,
    }];
    let membership = raftlease::replicator::to_membership(&servers).unwrap();
    let log_id = LogId::new(CommittedLeaderId::new(1, 1), 1);

    fsm.apply(&Entry {
        log_id,
        payload: EntryPayload::Membership(membership),
    });

    assert_eq!(fsm.membership().log_id(), &Some(log_id));
    assert_eq!(fsm.last_applied(), Some(log_id));
}

#[test]
fn test_expired_at() {
    let (fsm, _rx) = leader_fsm();
    fsm.apply(&entry(2, claim("short", "a/0", 10), t0()));
    fsm.apply(&entry(3, claim("long", "b/0", 100), t0()));

    assert!(fsm.expired_at(t0() + ChronoDuration::seconds(5)).is_empty());
    assert_eq!(
        fsm.expired_at(t0() + ChronoDuration::seconds(10)),
        vec![key("short")]
    );
}
