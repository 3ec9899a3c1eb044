//! Static membership and key directory

use crate::error::{CoreError, Result};
use crate::types::ReplicaId;
use std::collections::{HashMap, HashSet};

/// Largest number of Byzantine replicas tolerated among `n` (`n >= 3f + 1`)
pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Read-only view of the replica set.
///
/// Consumed by the link layer (whom to encrypt for) and by the epoch
/// consensus (how large a certificate must be). Nothing in the core mutates
/// membership at runtime.
pub trait MembershipOracle: Send + Sync {
    /// Ordered list of replicas (the leader included)
    fn replicas(&self) -> &[ReplicaId];

    /// The distinguished leader
    fn leader(&self) -> &ReplicaId;

    /// X25519 public key of a replica or client
    fn public_key(&self, id: &ReplicaId) -> Option<[u8; 32]>;

    /// Clients allowed to open links to replicas; they never count towards quorums
    fn clients(&self) -> &[ReplicaId] {
        &[]
    }

    /// Whether `id` is a replica
    fn contains(&self, id: &ReplicaId) -> bool {
        self.replicas().contains(id)
    }

    /// Total number of replicas `n`
    fn total(&self) -> usize {
        self.replicas().len()
    }

    /// Tolerated fault bound `f`
    fn max_faulty(&self) -> usize {
        max_faulty(self.total())
    }

    /// Certificate size `n - f`
    fn quorum_size(&self) -> usize {
        self.total() - self.max_faulty()
    }

    /// Every replica except `id`
    fn peers_of(&self, id: &ReplicaId) -> Vec<ReplicaId> {
        self.replicas().iter().filter(|r| *r != id).cloned().collect()
    }
}

/// Membership fixed at construction
#[derive(Debug, Clone)]
pub struct StaticMembership {
    replicas: Vec<ReplicaId>,
    clients: Vec<ReplicaId>,
    leader: ReplicaId,
    keys: HashMap<ReplicaId, [u8; 32]>,
}

impl StaticMembership {
    /// Create a membership, validating that the leader is a replica, names
    /// are unique, and every participant has a key.
    pub fn new(
        replicas: Vec<ReplicaId>,
        leader: ReplicaId,
        keys: HashMap<ReplicaId, [u8; 32]>,
    ) -> Result<Self> {
        Self::with_clients(replicas, Vec::new(), leader, keys)
    }

    /// Create a membership that also admits clients
    pub fn with_clients(
        replicas: Vec<ReplicaId>,
        clients: Vec<ReplicaId>,
        leader: ReplicaId,
        keys: HashMap<ReplicaId, [u8; 32]>,
    ) -> Result<Self> {
        if replicas.is_empty() {
            return Err(CoreError::membership("membership has no replicas"));
        }
        if !replicas.contains(&leader) {
            return Err(CoreError::membership(format!(
                "leader {} is not a replica",
                leader
            )));
        }

        let mut seen = HashSet::new();
        for id in replicas.iter().chain(clients.iter()) {
            if !seen.insert(id) {
                return Err(CoreError::membership(format!("duplicate id {}", id)));
            }
            if !keys.contains_key(id) {
                return Err(CoreError::membership(format!("no public key for {}", id)));
            }
        }

        Ok(Self {
            replicas,
            clients,
            leader,
            keys,
        })
    }
}

impl MembershipOracle for StaticMembership {
    fn replicas(&self) -> &[ReplicaId] {
        &self.replicas
    }

    fn leader(&self) -> &ReplicaId {
        &self.leader
    }

    fn public_key(&self, id: &ReplicaId) -> Option<[u8; 32]> {
        self.keys.get(id).copied()
    }

    fn clients(&self) -> &[ReplicaId] {
        &self.clients
    }
}
