//! Consensus state management

use depchain_core::{EpochNumber, ReplicaId, Value};
use std::collections::BTreeMap;

/// Phase of one epoch instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EpochPhase {
    /// Nothing happened yet
    Idle,
    /// READ sent (leader) or answered (member)
    Reading,
    /// Leader gathering STATE replies
    Collecting,
    /// Leader imposing the selected value
    Writing,
    /// Value written, gathering ACCEPTs
    Accepting,
    /// Decided; terminal
    Decided,
    /// Aborted; terminal
    Aborted,
}

impl EpochPhase {
    /// Whether the instance can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, EpochPhase::Decided | EpochPhase::Aborted)
    }
}

/// Per-replica consensus state carried across epochs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochState {
    /// Highest epoch this replica has started
    pub epoch: EpochNumber,
    /// Leader of that epoch
    pub leader: ReplicaId,
    /// Last written value; `None` is bottom
    pub value: Option<Value>,
    /// Epoch of the last WRITE that set `value`
    pub last_write_epoch: EpochNumber,
}

impl EpochState {
    /// State of a replica whose recovered chain holds `height` committed blocks
    pub fn recovered(leader: ReplicaId, height: EpochNumber) -> Self {
        Self {
            epoch: height,
            leader,
            value: None,
            last_write_epoch: 0,
        }
    }

    /// Overwrite the written value
    pub fn write(&mut self, epoch: EpochNumber, value: Value) {
        self.value = Some(value);
        self.last_write_epoch = epoch;
    }

    /// Reset to bottom once the slot is committed
    pub fn commit(&mut self) {
        self.value = None;
        self.last_write_epoch = 0;
    }
}

/// Outcome of adding a vote to a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome<V> {
    /// First vote from this sender
    New,
    /// Same vote again
    Repeat,
    /// Sender already voted differently; the first vote stands
    Conflict { previous: V },
}

/// Distinct-sender replies scoped to one epoch
#[derive(Debug, Clone)]
pub struct QuorumCertificate<V> {
    epoch: EpochNumber,
    votes: BTreeMap<ReplicaId, V>,
}

impl<V: Clone + PartialEq> QuorumCertificate<V> {
    pub fn new(epoch: EpochNumber) -> Self {
        Self {
            epoch,
            votes: BTreeMap::new(),
        }
    }

    /// Epoch the certificate is scoped to
    pub fn epoch(&self) -> EpochNumber {
        self.epoch
    }

    /// Add a vote; only the first vote per sender counts
    pub fn add(&mut self, sender: ReplicaId, vote: V) -> VoteOutcome<V> {
        match self.votes.get(&sender) {
            Some(previous) if *previous == vote => VoteOutcome::Repeat,
            Some(previous) => VoteOutcome::Conflict {
                previous: previous.clone(),
            },
            None => {
                self.votes.insert(sender, vote);
                VoteOutcome::New
            }
        }
    }

    /// Number of distinct senders
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Votes in ascending sender order
    pub fn votes(&self) -> &BTreeMap<ReplicaId, V> {
        &self.votes
    }

    /// Number of senders that voted exactly `vote`
    pub fn count_matching(&self, vote: &V) -> usize {
        self.votes.values().filter(|v| *v == vote).count()
    }

    /// A vote backed by at least `quorum` senders, if any
    pub fn quorum_vote(&self, quorum: usize) -> Option<&V> {
        self.votes
            .values()
            .find(|vote| self.count_matching(vote) >= quorum)
    }
}
