//! Byzantine replica detection
//!
//! Protocol faults never stop the epoch: the offending message is dropped and
//! the fault is counted here so operators can see which replica misbehaves.

use crate::error::ConsensusError;
use depchain_core::{EpochNumber, ReplicaId};
use std::collections::HashMap;
use tracing::warn;

/// Types of Byzantine violations
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Violation {
    /// Replica sent conflicting votes in one epoch
    Equivocation {
        replica: ReplicaId,
        epoch: EpochNumber,
    },

    /// Replica sent a leader-only message without being the leader
    Impersonation {
        replica: ReplicaId,
        epoch: EpochNumber,
        command: String,
    },

    /// Replica reported an impossible state
    InvalidState { replica: ReplicaId },

    /// Replica sent an undecodable protocol payload
    MalformedMessage { replica: ReplicaId },
}

impl Violation {
    /// Map a protocol error to the violation it evidences
    pub fn from_error(sender: &ReplicaId, error: &ConsensusError) -> Option<Self> {
        match error {
            ConsensusError::Equivocation { replica, epoch } => Some(Violation::Equivocation {
                replica: replica.clone(),
                epoch: *epoch,
            }),
            ConsensusError::UnexpectedSender {
                sender,
                command,
                epoch,
            } => Some(Violation::Impersonation {
                replica: sender.clone(),
                epoch: *epoch,
                command: command.clone(),
            }),
            ConsensusError::InvalidState { replica, .. } => Some(Violation::InvalidState {
                replica: replica.clone(),
            }),
            ConsensusError::Malformed { .. } => Some(Violation::MalformedMessage {
                replica: sender.clone(),
            }),
            _ => None,
        }
    }

    /// Replica at fault
    pub fn replica(&self) -> &ReplicaId {
        match self {
            Violation::Equivocation { replica, .. } => replica,
            Violation::Impersonation { replica, .. } => replica,
            Violation::InvalidState { replica } => replica,
            Violation::MalformedMessage { replica } => replica,
        }
    }
}

/// Per-replica count of detected violations.
///
/// Only members of the replica set are tracked, so the table never outgrows
/// the membership.
#[derive(Debug, Default)]
pub struct ByzantineDetector {
    counts: HashMap<ReplicaId, u64>,
}

impl ByzantineDetector {
    /// Track the given replicas
    pub fn new(replicas: impl IntoIterator<Item = ReplicaId>) -> Self {
        Self {
            counts: replicas.into_iter().map(|replica| (replica, 0)).collect(),
        }
    }

    /// Record the violation behind `error`, if it is one
    pub fn observe(&mut self, sender: &ReplicaId, error: &ConsensusError) -> Option<Violation> {
        let violation = Violation::from_error(sender, error)?;
        match self.counts.get_mut(violation.replica()) {
            Some(count) => {
                *count += 1;
                warn!(
                    replica = %violation.replica(),
                    violation = ?violation,
                    total = *count,
                    "Byzantine behavior detected"
                );
            }
            None => warn!(violation = ?violation, "Violation blamed on a replica outside the membership"),
        }
        Some(violation)
    }

    /// Violations recorded against `replica`
    pub fn violations(&self, replica: &ReplicaId) -> u64 {
        self.counts.get(replica).copied().unwrap_or(0)
    }
}
