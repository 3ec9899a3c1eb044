//! Node configuration loading and validation

use anyhow::{Context, Result};
use depchain_consensus::ConsensusConfig;
use depchain_core::{ReplicaId, StaticMembership};
use depchain_crypto::{decode_key_hex, TagScheme};
use depchain_network::LinkConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete node configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    pub node: NodeSection,

    #[serde(default)]
    pub consensus: ConsensusSection,

    #[serde(default)]
    pub network: NetworkSection,

    #[serde(default)]
    pub ledger: LedgerSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeSection {
    pub id: String,
    pub data_dir: PathBuf,
    /// Hex-encoded X25519 secret key written by `keygen`
    pub key_file: PathBuf,
    /// Membership file shared by every replica
    pub membership_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsensusSection {
    #[serde(default = "default_epoch_timeout")]
    pub epoch_timeout_ms: u64,
    #[serde(default = "default_status_interval")]
    pub status_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkSection {
    #[serde(default = "default_retransmit_interval")]
    pub retransmit_interval_ms: u64,
    #[serde(default)]
    pub integrity: TagScheme,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LedgerSection {
    /// Genesis allocation (`account → balance`); empty world state when unset
    #[serde(default)]
    pub genesis_accounts: Option<PathBuf>,
    #[serde(default = "default_blocks_dir")]
    pub blocks_dir: PathBuf,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            epoch_timeout_ms: default_epoch_timeout(),
            status_interval_ms: default_status_interval(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            retransmit_interval_ms: default_retransmit_interval(),
            integrity: TagScheme::default(),
        }
    }
}

// Default value functions
fn default_epoch_timeout() -> u64 { 5000 }
fn default_status_interval() -> u64 { 5000 }
fn default_retransmit_interval() -> u64 { 200 }
fn default_blocks_dir() -> PathBuf { PathBuf::from("blocks") }

impl NodeConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read configuration file {:?}", path.as_ref()))?;

        let config: NodeConfig = toml::from_str(&contents)
            .context("Failed to parse configuration file")?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.node.id.trim().is_empty() {
            anyhow::bail!("Node id must not be empty");
        }
        if self.consensus.epoch_timeout_ms == 0 {
            anyhow::bail!("Epoch timeout must be positive");
        }
        if self.consensus.status_interval_ms == 0 {
            anyhow::bail!("Status interval must be positive");
        }
        if self.network.retransmit_interval_ms == 0 {
            anyhow::bail!("Retransmit interval must be positive");
        }
        Ok(())
    }

    pub fn replica_id(&self) -> ReplicaId {
        ReplicaId::new(self.node.id.clone())
    }

    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            epoch_timeout: Duration::from_millis(self.consensus.epoch_timeout_ms),
            status_interval: Duration::from_millis(self.consensus.status_interval_ms),
            ..ConsensusConfig::default()
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            retransmit_interval: Duration::from_millis(self.network.retransmit_interval_ms),
            tag_scheme: self.network.integrity,
        }
    }

    /// Get absolute data directory path
    pub fn data_dir(&self) -> PathBuf {
        if self.node.data_dir.is_absolute() {
            self.node.data_dir.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.node.data_dir)
        }
    }

    /// Get absolute blocks directory path
    pub fn blocks_dir(&self) -> PathBuf {
        if self.ledger.blocks_dir.is_absolute() {
            self.ledger.blocks_dir.clone()
        } else {
            self.data_dir().join(&self.ledger.blocks_dir)
        }
    }
}

/// One participant of the membership file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Participant {
    pub id: String,
    pub host: IpAddr,
    /// First UDP port; the link to the participant at index `i` uses `base_port + i`
    pub base_port: u16,
    /// Hex-encoded X25519 public key
    pub public_key: String,
}

/// Static membership shared by every replica
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MembershipFile {
    pub leader: String,
    pub replicas: Vec<Participant>,
    #[serde(default)]
    pub clients: Vec<Participant>,
}

impl MembershipFile {
    /// Load the membership from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read membership file {:?}", path.as_ref()))?;
        let membership: MembershipFile = toml::from_str(&contents)
            .context("Failed to parse membership file")?;
        membership.validate()?;
        Ok(membership)
    }

    /// Check ids, keys and port ranges
    pub fn validate(&self) -> Result<()> {
        if self.replicas.is_empty() {
            anyhow::bail!("Membership has no replicas");
        }
        if !self.replicas.iter().any(|r| r.id == self.leader) {
            anyhow::bail!("Leader '{}' is not a replica", self.leader);
        }

        let span = self.participants().count() as u32;
        let mut ids = HashSet::new();
        for participant in self.participants() {
            if !ids.insert(participant.id.as_str()) {
                anyhow::bail!("Duplicate participant '{}'", participant.id);
            }
            decode_key_hex(&participant.public_key)
                .with_context(|| format!("Invalid public key for '{}'", participant.id))?;
            if participant.base_port as u32 + span > u16::MAX as u32 + 1 {
                anyhow::bail!("Port range of '{}' exceeds 65535", participant.id);
            }
        }
        Ok(())
    }

    /// Replicas first, then clients; the order fixes the port offsets
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.replicas.iter().chain(self.clients.iter())
    }

    /// Participant by id
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants().find(|p| p.id == id)
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.participants().position(|p| p.id == id)
    }

    /// Local and remote address of the UDP channel from `local` to `peer`
    pub fn channel(&self, local: &str, peer: &str) -> Result<(SocketAddr, SocketAddr)> {
        let me = self
            .participant(local)
            .with_context(|| format!("Unknown participant '{}'", local))?;
        let them = self
            .participant(peer)
            .with_context(|| format!("Unknown participant '{}'", peer))?;
        let my_index = self.index_of(local).unwrap_or_default() as u16;
        let their_index = self.index_of(peer).unwrap_or_default() as u16;
        Ok((
            SocketAddr::new(me.host, me.base_port + their_index),
            SocketAddr::new(them.host, them.base_port + my_index),
        ))
    }

    /// Membership oracle for the consensus core
    pub fn to_membership(&self) -> Result<StaticMembership> {
        let mut keys = HashMap::new();
        for participant in self.participants() {
            keys.insert(
                ReplicaId::new(participant.id.clone()),
                decode_key_hex(&participant.public_key)?,
            );
        }
        let membership = StaticMembership::with_clients(
            self.replicas.iter().map(|r| ReplicaId::new(r.id.clone())).collect(),
            self.clients.iter().map(|c| ReplicaId::new(c.id.clone())).collect(),
            ReplicaId::new(self.leader.clone()),
            keys,
        )?;
        Ok(membership)
    }
}
