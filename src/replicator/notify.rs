use crate::types::{LeaseEvent, LeaseKey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Receives committed lease transitions from the state machine.
///
/// Called synchronously while entries are applied, and only on the node
/// currently leading. Implementations must not call back into the state
/// machine.
pub trait NotifyTarget: Send + Sync {
    fn claimed(&self, key: &LeaseKey, holder: &str) -> anyhow::Result<()>;
    fn expired(&self, key: &LeaseKey) -> anyhow::Result<()>;
}

/// Whether the local node currently leads. Shared between the raft metrics
/// watcher, which writes it, and the state machine, which reads it.
#[derive(Debug, Clone, Default)]
pub struct Leadership(Arc<AtomicBool>);

impl Leadership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leader() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn set(&self, is_leader: bool) {
        self.0.store(is_leader, Ordering::SeqCst);
    }

    pub fn is_leader(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct NoopTarget;

impl NotifyTarget for NoopTarget {
    fn claimed(&self, _key: &LeaseKey, _holder: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn expired(&self, _key: &LeaseKey) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct LoggingTarget;

impl NotifyTarget for LoggingTarget {
    fn claimed(&self, key: &LeaseKey, holder: &str) -> anyhow::Result<()> {
        info!("Lease {} claimed by {}", key, holder);
        Ok(())
    }

    fn expired(&self, key: &LeaseKey) -> anyhow::Result<()> {
        info!("Lease {} expired", key);
        Ok(())
    }
}

/// Forwards transitions as [`LeaseEvent`]s to a consumer task.
#[derive(Clone)]
pub struct ChannelTarget {
    tx: mpsc::UnboundedSender<LeaseEvent>,
}

impl ChannelTarget {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LeaseEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: LeaseEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow::anyhow!("lease event receiver dropped"))
    }
}

impl NotifyTarget for ChannelTarget {
    fn claimed(&self, key: &LeaseKey, holder: &str) -> anyhow::Result<()> {
        self.send(LeaseEvent::Claimed {
            key: key.clone(),
            holder: holder.to_string(),
        })
    }

    fn expired(&self, key: &LeaseKey) -> anyhow::Result<()> {
        self.send(LeaseEvent::Expired { key: key.clone() })
    }
}

pub fn dispatch(target: &dyn NotifyTarget, event: &LeaseEvent) -> anyhow::Result<()> {
    match event {
        LeaseEvent::Claimed { key, holder } => target.claimed(key, holder),
        LeaseEvent::Expired { key } => target.expired(key),
    }
}
