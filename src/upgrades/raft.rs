use super::UpgradeContext;
use crate::error::{Error, Result, StoreError};
use crate::replicator::log_store::{LogStore, SyncPolicy};
use crate::replicator::membership::{derive_configuration, parse_node_id, to_membership};
use crate::replicator::snapshot_store::SnapshotStore;
use crate::replicator::state_machine::{LeaseSnapshot, LeaseTable};
use crate::replicator::storage::TypeConfig;
use chrono::Utc;
use openraft::{CommittedLeaderId, Entry, EntryPayload, LogId, SnapshotMeta, StoredMembership, Vote};
use std::path::Path;
use tracing::{debug, info, warn};

const BOOTSTRAP_TERM: u64 = 1;
const BOOTSTRAP_INDEX: u64 = 1;

fn open_stores(raft_dir: &Path) -> Result<(LogStore, SnapshotStore)> {
    std::fs::create_dir_all(raft_dir).map_err(StoreError::Io)?;
    let log = LogStore::open(raft_dir.join("logs"), SyncPolicy::SyncAfterWrite)?;
    let snapshots = SnapshotStore::open(raft_dir.join("snapshots"), 1)?;
    Ok((log, snapshots))
}

/// Seeds the raft log with the initial cluster configuration.
///
/// Every controller runs this against the same replica-set membership and
/// writes the same entries, so the logs agree before raft first starts. A
/// node with existing raft state (a configuration entry, a saved vote, a
/// purge marker or a snapshot) is left alone. Entries with none of those
/// are a partial bootstrap and are cleared before retrying.
pub async fn bootstrap_raft(ctx: &dyn UpgradeContext) -> Result<()> {
    let agent = ctx.agent_config();
    let local_id = agent.machine_id()?.to_string();
    let raft_dir = agent.raft_dir();

    let (log, snapshots) = open_stores(&raft_dir)?;
    let result = seed_log(&log, &snapshots, ctx, &local_id).await;
    let closed = log.close();
    result?;
    closed?;
    Ok(())
}

fn has_existing_state(log: &LogStore, snapshots: &SnapshotStore) -> Result<bool> {
    Ok(log.has_configuration()?
        || log.vote()?.is_some()
        || log.last_purged()?.is_some()
        || !snapshots.list()?.is_empty())
}

async fn seed_log(
    log: &LogStore,
    snapshots: &SnapshotStore,
    ctx: &dyn UpgradeContext,
    local_id: &str,
) -> Result<()> {
    if has_existing_state(log, snapshots)? {
        info!("Raft already has existing state, skipping bootstrap");
        return Ok(());
    }
    if !log.is_empty() {
        warn!("Raft log has entries but no configuration, discarding partial bootstrap");
        log.truncate_from(0)?;
    }

    let state = ctx.state();
    let members = state.replica_set_members().await.map_err(Error::Backend)?;
    let serving = state.state_serving_info().await.map_err(Error::Backend)?;
    let controller = state.controller_config().await.map_err(Error::Backend)?;

    let servers = derive_configuration(&members, serving.api_port, local_id)?;
    let membership = to_membership(&servers)?;

    // Every node must write an identical log id at the bootstrap index, so
    // the entry is attributed to the lowest voter rather than to the local
    // node.
    let designated = membership
        .voter_ids()
        .min()
        .ok_or_else(|| Error::InvalidMembership("no voting members".to_string()))?;

    let genesis = Entry::<TypeConfig> {
        log_id: LogId::new(CommittedLeaderId::new(0, 0), 0),
        payload: EntryPayload::Blank,
    };
    let config = Entry::<TypeConfig> {
        log_id: LogId::new(
            CommittedLeaderId::new(BOOTSTRAP_TERM, designated),
            BOOTSTRAP_INDEX,
        ),
        payload: EntryPayload::Membership(membership),
    };

    log.append([genesis, config])?;
    log.save_vote(&Vote::new(BOOTSTRAP_TERM, designated))?;
    log.save_local_id(parse_node_id(local_id)?)?;

    for server in &servers {
        debug!("Bootstrap server {} at {} ({:?})", server.id, server.address, server.suffrage);
    }
    info!(
        "Bootstrapped raft for controller {} with {} servers at {:?}",
        controller.controller_uuid,
        servers.len(),
        ctx.agent_config().raft_dir()
    );
    Ok(())
}

/// Copies leases from the legacy store into a raft snapshot taken at the
/// bootstrap configuration, so that raft starts with them already applied.
///
/// Skipped once the node has a snapshot or any lease command in its log.
/// The legacy store itself is left in place; see [`drop_legacy_leases`].
pub async fn migrate_legacy_leases(ctx: &dyn UpgradeContext) -> Result<()> {
    let (log, snapshots) = open_stores(&ctx.agent_config().raft_dir())?;
    let result = migrate(&log, &snapshots, ctx).await;
    let closed = log.close();
    result?;
    closed?;
    Ok(())
}

async fn migrate(log: &LogStore, snapshots: &SnapshotStore, ctx: &dyn UpgradeContext) -> Result<()> {
    if snapshots.open_latest()?.is_some() || log.last_purged()?.is_some() || log.has_commands()? {
        info!("Raft already holds lease state, skipping legacy lease migration");
        return Ok(());
    }
    let Some((config_id, membership)) = log.configuration()? else {
        return Err(Error::Corrupt(
            "raft log has no configuration entry; bootstrap has not run".to_string(),
        ));
    };

    let state = ctx.state();
    let mut legacy = state.legacy_leases(Utc::now()).await.map_err(Error::Backend)?;
    legacy.retain(|key, info| {
        if info.holder.is_empty() {
            warn!("Skipping legacy lease {} with no holder", key);
        }
        !info.holder.is_empty()
    });
    if legacy.is_empty() {
        info!("No legacy leases to migrate");
        return Ok(());
    }

    let snapshot = LeaseSnapshot {
        last_applied: Some(config_id),
        membership: StoredMembership::new(Some(config_id), membership),
        leases: LeaseTable::from(legacy),
    };
    let data = snapshot
        .to_bytes()
        .map_err(|e| StoreError::Codec(e.to_string()))?;
    let meta = SnapshotMeta {
        last_log_id: Some(config_id),
        last_membership: snapshot.membership.clone(),
        snapshot_id: format!("{}-{}-migrated", config_id.leader_id, config_id.index),
    };

    snapshots.save(&meta, &data)?;
    log.save_committed(Some(config_id))?;

    let target = state.lease_notify_target().map_err(Error::Backend)?;
    for (key, info) in snapshot.leases.iter() {
        if let Err(e) = target.claimed(key, &info.holder) {
            warn!("Failed to notify migrated lease {}: {:#}", key, e);
        }
    }

    info!(
        "Migrated {} legacy leases into snapshot {}",
        snapshot.leases.len(),
        meta.snapshot_id
    );
    Ok(())
}

/// Removes the legacy lease store. Run once every controller has migrated;
/// refuses while this node still has unmigrated leases.
pub async fn drop_legacy_leases(ctx: &dyn UpgradeContext) -> Result<()> {
    let (log, snapshots) = open_stores(&ctx.agent_config().raft_dir())?;
    let result = check_migrated(&log, &snapshots, ctx).await;
    let closed = log.close();
    result?;
    closed?;

    ctx.state()
        .drop_leases_collection()
        .await
        .map_err(Error::Backend)?;
    info!("Dropped legacy lease store");
    Ok(())
}

async fn check_migrated(log: &LogStore, snapshots: &SnapshotStore, ctx: &dyn UpgradeContext) -> Result<()> {
    if !has_existing_state(log, snapshots)? {
        return Err(Error::Config("raft has not been bootstrapped".to_string()));
    }
    if snapshots.open_latest()?.is_some() || log.last_purged()?.is_some() || log.has_commands()? {
        return Ok(());
    }
    let mut legacy = ctx
        .state()
        .legacy_leases(Utc::now())
        .await
        .map_err(Error::Backend)?;
    legacy.retain(|_, info| !info.holder.is_empty());
    if !legacy.is_empty() {
        return Err(Error::Config(format!(
            "{} legacy leases have not been migrated",
            legacy.len()
        )));
    }
    Ok(())
}
