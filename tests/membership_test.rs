use raftlease::replicator::membership::*;
use raftlease::*;
use std::collections::HashMap;

fn member(address: &str, machine_id: &str, votes: Option<i32>) -> ReplicaSetMember {
    ReplicaSetMember {
        address: address.to_string(),
        tags: HashMap::from([(MACHINE_ID_TAG.to_string(), machine_id.to_string())]),
        votes,
    }
}

#[test]
fn test_derive_voters_and_non_voters() {
    let members = vec![
        member("somewhere.else:37012", "42", None),
        member("nowhere.else:37012", "23", Some(1)),
        member("everywhere.else:37012", "7", Some(0)),
    ];

    let servers = derive_configuration(&members, 1234, "23").unwrap();

    assert_eq!(
        servers,
        vec![
            ServerConfig {
                id: 42,
                address: "somewhere.else:1234".to_string(),
                suffrage: Suffrage::Voter,
            },
            ServerConfig {
                id: 23,
                address: "nowhere.else:1234".to_string(),
                suffrage: Suffrage::Voter,
            },
            ServerConfig {
                id: 7,
                address: "everywhere.else:1234".to_string(),
                suffrage: Suffrage::NonVoter,
            },
        ]
    );
}

#[test]
fn test_derive_rejects_missing_tag() {
    let members = vec![
        member("a:1", "1", None),
        ReplicaSetMember {
            address: "b:1".to_string(),
            tags: HashMap::new(),
            votes: None,
        },
    ];

    let err = derive_configuration(&members, 17070, "1").unwrap_err();
    assert!(matches!(err, Error::InvalidMembership(_)));
    assert!(err.is_configuration());
}

#[test]
fn test_derive_rejects_malformed_tag() {
    let members = vec![member("a:1", "1", None), member("b:1", "not-a-number", None)];

    let err = derive_configuration(&members, 17070, "1").unwrap_err();
    assert!(matches!(err, Error::InvalidMembership(_)));
}

#[test]
fn test_derive_rejects_duplicate_ids() {
    let members = vec![member("a:1", "1", None), member("b:1", "1", Some(0))];

    let err = derive_configuration(&members, 17070, "1").unwrap_err();
    assert!(matches!(err, Error::DuplicateServer(1)));
}

#[test]
fn test_derive_requires_local_node() {
    let members = vec![member("a:1", "1", None), member("b:1", "2", None)];

    let err = derive_configuration(&members, 17070, "3").unwrap_err();
    assert!(matches!(err, Error::LocalNodeMissing(ref id) if id == "3"));
}

#[test]
fn test_membership_round_trip_keeps_suffrage() {
    let members = vec![
        member("a:1", "1", None),
        member("b:1", "2", Some(1)),
        member("c:1", "3", Some(0)),
    ];
    let servers = derive_configuration(&members, 9000, "1").unwrap();

    let membership = to_membership(&servers).unwrap();
    let voters: Vec<NodeId> = membership.voter_ids().collect();
    assert_eq!(voters, vec![1, 2]);

    let mut back = from_membership(&membership);
    back.sort_by_key(|s| s.id);
    let mut expected = servers.clone();
    expected.sort_by_key(|s| s.id);
    assert_eq!(back, expected);
}

#[test]
fn test_membership_requires_a_voter() {
    let servers = vec![ServerConfig {
        id: 1,
        address: "a:1".to_string(),
        suffrage: Suffrage::NonVoter,
    }];

    assert!(matches!(
        to_membership(&servers),
        Err(Error::InvalidMembership(_))
    ));
}
