use crate::error::{Error, Result};
use crate::replicator::storage::LeaseNode;
use crate::types::{NodeId, ReplicaSetMember, ServerConfig, Suffrage};
use openraft::Membership;
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub fn parse_node_id(raw: &str) -> Result<NodeId> {
    raw.parse::<NodeId>()
        .map_err(|_| Error::InvalidMembership(format!("malformed machine id {raw:?}")))
}

/// Replaces the port of `address` with `port`, keeping the host. Bracketed
/// IPv6 hosts keep their brackets.
fn with_port(address: &str, port: u16) -> Result<String> {
    let host = if address.starts_with('[') {
        match address.find(']') {
            Some(end) => &address[..=end],
            None => return Err(Error::InvalidMembership(format!("bad address {address:?}"))),
        }
    } else {
        match address.rsplit_once(':') {
            Some((host, _)) => host,
            None => address,
        }
    };
    if host.is_empty() || host == "[]" {
        return Err(Error::InvalidMembership(format!(
            "address {address:?} has no host"
        )));
    }
    Ok(format!("{host}:{port}"))
}

/// Derives the raft server set from replica-set membership.
///
/// Every member must carry a numeric machine-id tag, ids must be unique, and
/// the local machine must be among them. Members with an explicit vote
/// weight of zero become non-voters.
pub fn derive_configuration(
    members: &[ReplicaSetMember],
    api_port: u16,
    local_id: &str,
) -> Result<Vec<ServerConfig>> {
    let local = parse_node_id(local_id)?;
    let mut seen = HashSet::new();
    let mut servers = Vec::with_capacity(members.len());

    for member in members {
        let machine_id = member.machine_id().ok_or_else(|| {
            Error::InvalidMembership(format!("member {:?} has no machine id tag", member.address))
        })?;
        let id = parse_node_id(machine_id)?;
        if !seen.insert(id) {
            return Err(Error::DuplicateServer(id));
        }

        let suffrage = match member.votes {
            Some(0) => Suffrage::NonVoter,
            _ => Suffrage::Voter,
        };

        servers.push(ServerConfig {
            id,
            address: with_port(&member.address, api_port)?,
            suffrage,
        });
    }

    if !seen.contains(&local) {
        return Err(Error::LocalNodeMissing(local_id.to_string()));
    }

    Ok(servers)
}

/// Voters form the single joint config; non-voters join as learners.
pub fn to_membership(servers: &[ServerConfig]) -> Result<Membership<NodeId, LeaseNode>> {
    let voters: BTreeSet<NodeId> = servers
        .iter()
        .filter(|s| s.suffrage == Suffrage::Voter)
        .map(|s| s.id)
        .collect();
    if voters.is_empty() {
        return Err(Error::InvalidMembership("no voting members".to_string()));
    }

    let nodes: BTreeMap<NodeId, LeaseNode> = servers
        .iter()
        .map(|s| (s.id, LeaseNode::new(s.address.clone())))
        .collect();

    Ok(Membership::new(vec![voters], nodes))
}

pub fn from_membership(membership: &Membership<NodeId, LeaseNode>) -> Vec<ServerConfig> {
    let voters: BTreeSet<NodeId> = membership.voter_ids().collect();
    membership
        .nodes()
        .map(|(id, node)| ServerConfig {
            id: *id,
            address: node.addr.clone(),
            suffrage: if voters.contains(id) {
                Suffrage::Voter
            } else {
                Suffrage::NonVoter
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_port() {
        assert_eq!(with_port("somewhere.else:37012", 1234).unwrap(), "somewhere.else:1234");
        assert_eq!(with_port("10.0.0.1", 17070).unwrap(), "10.0.0.1:17070");
        assert_eq!(with_port("[::1]:37017", 17070).unwrap(), "[::1]:17070");
        assert!(with_port(":37017", 17070).is_err());
    }
}
