use crate::types::{LeaseKey, NodeId};
use openraft::{ErrorSubject, ErrorVerb, StorageError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejections produced by the lease state machine. They travel back to the
/// proposer inside `LeaseResponse` and never affect the log itself.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseError {
    #[error("lease {key} already held by {holder}")]
    AlreadyHeld { key: LeaseKey, holder: String },

    #[error("{holder} does not hold lease {key}")]
    NotHolder { key: LeaseKey, holder: String },

    #[error("lease {key} requested with an empty holder")]
    EmptyHolder { key: LeaseKey },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("corrupt {what} at {location}: {reason}")]
    Corrupt {
        what: &'static str,
        location: String,
        reason: String,
    },

    #[error("log gap: expected index {expected}, got {got}")]
    Gap { expected: u64, got: u64 },

    #[error("encoding error: {0}")]
    Codec(String),
}

impl StoreError {
    pub(crate) fn corrupt(
        what: &'static str,
        location: impl ToString,
        reason: impl ToString,
    ) -> Self {
        StoreError::Corrupt {
            what,
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn into_storage_error(
        self,
        subject: ErrorSubject<NodeId>,
        verb: ErrorVerb,
    ) -> StorageError<NodeId> {
        StorageError::from_io_error(subject, verb, std::io::Error::other(self))
    }
}

/// Errors surfaced to the upgrade runner.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid membership: {0}")]
    InvalidMembership(String),

    #[error("duplicate server id {0} in configuration")]
    DuplicateServer(NodeId),

    #[error("local node {0} missing from configuration")]
    LocalNodeMissing(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] StoreError),

    #[error("corrupt raft storage: {0}")]
    Corrupt(String),

    #[error("state backend: {0:#}")]
    Backend(anyhow::Error),

    #[error("invalid agent config: {0}")]
    Config(String),
}

impl Error {
    /// Configuration errors cannot succeed on retry with the same input.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidMembership(_)
                | Error::DuplicateServer(_)
                | Error::LocalNodeMissing(_)
                | Error::Config(_)
        )
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt { .. } => Error::Corrupt(err.to_string()),
            other => Error::StorageUnavailable(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
