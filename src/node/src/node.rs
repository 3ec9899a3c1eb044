//! Replica process: wires keys, membership, ledger and UDP links into a
//! running [`Replica`]

use anyhow::{Context, Result};
use depchain_consensus::{Replica, ReplicaEvent};
use depchain_core::{Ledger, MembershipOracle, ReplicaId};
use depchain_crypto::{decode_key_hex, ReplicaKeyPair};
use depchain_network::{AuthenticatedLink, UdpEndpoint};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use crate::config::{MembershipFile, NodeConfig};
use crate::ledger::{load_genesis_accounts, FileLedger};

/// A replica bound to its UDP channels
pub struct ReplicaNode {
    id: ReplicaId,
    replica: Replica,
    ledger: Arc<FileLedger>,
}

/// Read the hex secret written by `keygen`
pub fn load_key_pair(path: &Path) -> Result<ReplicaKeyPair> {
    let encoded = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file {:?}", path))?;
    let keys = ReplicaKeyPair::from_secret_hex(encoded.trim())
        .with_context(|| format!("Invalid key in {:?}", path))?;
    Ok(keys)
}

impl ReplicaNode {
    /// Bring up a replica from its configuration
    pub async fn new(config: NodeConfig) -> Result<Self> {
        let id = config.replica_id();
        info!(replica = %id, "Initializing replica");

        let keys = Arc::new(load_key_pair(&config.node.key_file)?);
        let membership_file = MembershipFile::load(&config.node.membership_file)?;
        let me = membership_file
            .replicas
            .iter()
            .find(|r| r.id == id.as_str())
            .with_context(|| format!("'{}' is not a replica in the membership file", id))?;
        if decode_key_hex(&me.public_key)? != keys.public_key() {
            anyhow::bail!("Key file does not match the public key registered for '{}'", id);
        }
        let membership: Arc<dyn MembershipOracle> = Arc::new(membership_file.to_membership()?);

        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;
        let genesis = match &config.ledger.genesis_accounts {
            Some(path) => load_genesis_accounts(path)?,
            None => BTreeMap::new(),
        };
        let ledger = Arc::new(
            FileLedger::open(config.blocks_dir(), genesis).context("Failed to open ledger")?,
        );

        let link_config = config.link_config();
        let notify = Arc::new(Notify::new());
        let mut links = BTreeMap::new();
        for peer in membership_file.participants().filter(|p| p.id != id.as_str()) {
            let (local_addr, remote_addr) = membership_file.channel(id.as_str(), &peer.id)?;
            let endpoint = UdpEndpoint::bind(local_addr, remote_addr)
                .await
                .with_context(|| format!("Failed to bind {} for peer '{}'", local_addr, peer.id))?;
            let peer_id = ReplicaId::new(peer.id.clone());
            let link = AuthenticatedLink::connect(
                id.clone(),
                keys.clone(),
                peer_id.clone(),
                decode_key_hex(&peer.public_key)?,
                Arc::new(endpoint),
                &link_config,
                notify.clone(),
            )?;
            debug!(peer = %peer_id, local = %local_addr, remote = %remote_addr, "Link bound");
            links.insert(peer_id, link);
        }
        info!(
            replica = %id,
            peers = links.len(),
            leader = %membership.leader(),
            integrity = ?link_config.tag_scheme,
            "Links established"
        );

        let replica = Replica::spawn(
            id.clone(),
            membership,
            ledger.clone() as Arc<dyn Ledger>,
            links,
            notify,
            config.consensus_config(),
        )
        .context("Failed to start replica")?;

        Ok(Self {
            id,
            replica,
            ledger,
        })
    }

    /// Replica handle, for proposals and queries
    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Log decisions and aborts as they happen; fails once the replica halts
    pub async fn run(&self) -> Result<()> {
        let mut events = self.replica.subscribe();
        loop {
            match events.recv().await {
                Ok(ReplicaEvent::Decided { epoch, block }) => {
                    info!(
                        epoch,
                        height = self.ledger.height(),
                        transactions = block.transactions.len(),
                        hash = %block.hash,
                        "Block committed"
                    );
                }
                Ok(ReplicaEvent::Aborted { epoch }) => {
                    warn!(epoch, "Epoch aborted");
                }
                Ok(ReplicaEvent::Halted { epoch }) => {
                    anyhow::bail!("replica halted: block of epoch {} could not be persisted", epoch);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event log lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    /// Stop the replica loop and its links
    pub async fn shutdown(&self) -> Result<()> {
        info!(replica = %self.id, height = self.ledger.height(), "Shutting down replica");
        self.replica.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, membership: &str) -> NodeConfig {
        let membership_path = dir.join("membership.toml");
        std::fs::write(&membership_path, membership).unwrap();
        toml::from_str(&format!(
            r#"
[node]
id = "leader"
data_dir = {:?}
key_file = {:?}
membership_file = {:?}
"#,
            dir.join("data"),
            dir.join("leader.key"),
            membership_path
        ))
        .unwrap()
    }

    #[test]
    fn test_key_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leader.key");
        let keys = ReplicaKeyPair::generate();
        std::fs::write(&path, format!("{}\n", keys.secret_key_hex())).unwrap();

        let loaded = load_key_pair(&path).unwrap();
        assert_eq!(loaded.public_key(), keys.public_key());

        std::fs::write(&path, "not hex").unwrap();
        assert!(load_key_pair(&path).is_err());
    }

    #[tokio::test]
    async fn test_key_must_match_membership() {
        let dir = tempfile::tempdir().unwrap();
        let keys = ReplicaKeyPair::generate();
        std::fs::write(dir.path().join("leader.key"), keys.secret_key_hex()).unwrap();
        let other = ReplicaKeyPair::generate();
        let config = write_config(
            dir.path(),
            &format!(
                r#"
leader = "leader"

[[replicas]]
id = "leader"
host = "127.0.0.1"
base_port = 41000
public_key = "{}"
"#,
                other.public_key_hex()
            ),
        );

        let err = ReplicaNode::new(config).await.err().unwrap();
        assert!(err.to_string().contains("does not match"));
    }

    #[tokio::test]
    async fn test_unknown_replica_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let keys = ReplicaKeyPair::generate();
        std::fs::write(dir.path().join("leader.key"), keys.secret_key_hex()).unwrap();
        let config = write_config(
            dir.path(),
            &format!(
                r#"
leader = "member1"

[[replicas]]
id = "member1"
host = "127.0.0.1"
base_port = 41100
public_key = "{}"
"#,
                keys.public_key_hex()
            ),
        );

        assert!(ReplicaNode::new(config).await.is_err());
    }
}
