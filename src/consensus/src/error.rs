//! Error types for consensus operations

use depchain_core::{EpochNumber, ReplicaId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConsensusError>;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Not the leader for epoch {epoch}")]
    NotLeader { epoch: EpochNumber },

    #[error("Epoch {epoch} is still in progress")]
    EpochInProgress { epoch: EpochNumber },

    #[error("Invalid epoch: expected {expected}, got {actual}")]
    InvalidEpoch {
        expected: EpochNumber,
        actual: EpochNumber,
    },

    #[error("Stale epoch {epoch}: last write was in epoch {last_write_epoch}")]
    StaleEpoch {
        epoch: EpochNumber,
        last_write_epoch: EpochNumber,
    },

    #[error("Unexpected sender {sender} for {command} in epoch {epoch}")]
    UnexpectedSender {
        sender: ReplicaId,
        command: String,
        epoch: EpochNumber,
    },

    #[error("Unknown replica: {0}")]
    UnknownReplica(ReplicaId),

    #[error("Equivocation detected from replica {replica} in epoch {epoch}")]
    Equivocation {
        replica: ReplicaId,
        epoch: EpochNumber,
    },

    #[error("Invalid state reply from {replica}: {reason}")]
    InvalidState { replica: ReplicaId, reason: String },

    #[error("Malformed {command} payload: {reason}")]
    Malformed { command: String, reason: String },

    #[error("Ledger error: {0}")]
    Ledger(#[from] depchain_core::CoreError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // Prometheus metrics error
    #[error("Prometheus metric error: {0}")]
    Metrics(String),
}

impl From<serde_json::Error> for ConsensusError {
    fn from(e: serde_json::Error) -> Self {
        ConsensusError::Serialization(e.to_string())
    }
}

impl From<prometheus::Error> for ConsensusError {
    fn from(e: prometheus::Error) -> Self {
        ConsensusError::Metrics(e.to_string())
    }
}
