mod raft;

pub use raft::{bootstrap_raft, drop_legacy_leases, migrate_legacy_leases};

use crate::backend::StateBackend;
use crate::error::{Error, Result};
use crate::replicator::membership::parse_node_id;
use crate::types::NodeId;
use std::path::PathBuf;
use tracing::info;

const MACHINE_TAG_PREFIX: &str = "machine-";

/// What an upgrade step knows about the agent it runs in.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub data_dir: PathBuf,
    /// Agent tag, e.g. `machine-23`.
    pub tag: String,
    pub upgraded_to_version: String,
}

impl AgentConfig {
    pub fn machine_id(&self) -> Result<&str> {
        self.tag
            .strip_prefix(MACHINE_TAG_PREFIX)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Config(format!("agent tag {:?} is not a machine tag", self.tag)))
    }

    pub fn node_id(&self) -> Result<NodeId> {
        parse_node_id(self.machine_id()?)
    }

    pub fn raft_dir(&self) -> PathBuf {
        self.data_dir.join("raft")
    }
}

pub trait UpgradeContext: Send + Sync {
    fn agent_config(&self) -> &AgentConfig;
    fn state(&self) -> &dyn StateBackend;
}

/// The plain context used by the daemon and tests.
pub struct StepContext<B> {
    agent: AgentConfig,
    state: B,
}

impl<B: StateBackend> StepContext<B> {
    pub fn new(agent: AgentConfig, state: B) -> Self {
        Self { agent, state }
    }

    pub fn into_state(self) -> B {
        self.state
    }
}

impl<B: StateBackend> UpgradeContext for StepContext<B> {
    fn agent_config(&self) -> &AgentConfig {
        &self.agent
    }

    fn state(&self) -> &dyn StateBackend {
        &self.state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    BootstrapRaft,
    MigrateLegacyLeases,
}

impl Step {
    pub fn description(&self) -> &'static str {
        match self {
            Step::BootstrapRaft => "bootstrap raft cluster",
            Step::MigrateLegacyLeases => "migrate legacy leases into raft",
        }
    }

    pub async fn run(&self, ctx: &dyn UpgradeContext) -> Result<()> {
        match self {
            Step::BootstrapRaft => bootstrap_raft(ctx).await,
            Step::MigrateLegacyLeases => migrate_legacy_leases(ctx).await,
        }
    }
}

/// Steps in the order they must run.
pub fn upgrade_steps() -> Vec<Step> {
    vec![Step::BootstrapRaft, Step::MigrateLegacyLeases]
}

pub async fn run_upgrade_steps(ctx: &dyn UpgradeContext) -> Result<()> {
    let version = &ctx.agent_config().upgraded_to_version;
    for step in upgrade_steps() {
        info!("Running upgrade step for {}: {}", version, step.description());
        step.run(ctx).await?;
    }
    Ok(())
}
