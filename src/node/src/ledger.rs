//! Block store on the local file system.
//!
//! One JSON file per committed block, `blocks/<height:06>.json`, genesis at
//! height 0. The world state is rebuilt from the genesis allocation and the
//! recovered chain at startup.

use depchain_core::{Block, CoreError, Ledger, Result, WorldState};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Ledger persisted as one JSON file per block
pub struct FileLedger {
    blocks_dir: PathBuf,
    chain: RwLock<Vec<Block>>,
    world_state: RwLock<WorldState>,
}

fn block_file(dir: &Path, height: usize) -> PathBuf {
    dir.join(format!("{:06}.json", height))
}

/// Read a genesis allocation (`{"account": balance, ...}`)
pub fn load_genesis_accounts(path: &Path) -> Result<BTreeMap<String, u64>> {
    let contents = std::fs::read(path)
        .map_err(|e| CoreError::ledger(format!("reading {:?}: {}", path, e)))?;
    serde_json::from_slice(&contents)
        .map_err(|e| CoreError::serialization(format!("parsing {:?}: {}", path, e)))
}

impl FileLedger {
    /// Open the block store, writing the genesis block on first use
    pub fn open(blocks_dir: impl Into<PathBuf>, genesis: BTreeMap<String, u64>) -> Result<Self> {
        let blocks_dir = blocks_dir.into();
        std::fs::create_dir_all(&blocks_dir)
            .map_err(|e| CoreError::ledger(format!("creating {:?}: {}", blocks_dir, e)))?;

        let mut chain = Self::recover(&blocks_dir)?;
        if chain.is_empty() {
            let genesis_block = Block::genesis();
            write_block(&block_file(&blocks_dir, 0), &genesis_block)?;
            chain.push(genesis_block);
        }

        let mut world_state = WorldState::new(genesis);
        for block in &chain {
            world_state.apply_block(block);
        }
        info!(
            blocks_dir = ?blocks_dir,
            height = chain.len() - 1,
            accounts = world_state.accounts().len(),
            "Ledger recovered"
        );

        Ok(Self {
            blocks_dir,
            chain: RwLock::new(chain),
            world_state: RwLock::new(world_state),
        })
    }

    /// Read every block file in order and check the hash chain
    fn recover(blocks_dir: &Path) -> Result<Vec<Block>> {
        let entries = std::fs::read_dir(blocks_dir)
            .map_err(|e| CoreError::ledger(format!("reading {:?}: {}", blocks_dir, e)))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| CoreError::ledger(e.to_string()))?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut chain: Vec<Block> = Vec::with_capacity(paths.len());
        for path in paths {
            let contents = std::fs::read(&path)
                .map_err(|e| CoreError::ledger(format!("reading {:?}: {}", path, e)))?;
            let block: Block = serde_json::from_slice(&contents)
                .map_err(|e| CoreError::serialization(format!("parsing {:?}: {}", path, e)))?;
            if !block.verify_hash() {
                return Err(CoreError::invalid(format!("block {:?} has a bad hash", path)));
            }
            let expected_previous = chain
                .last()
                .map(|b| b.hash.clone())
                .unwrap_or_else(Block::zero_hash);
            if block.previous_hash != expected_previous {
                return Err(CoreError::invalid(format!(
                    "block {:?} does not extend the chain",
                    path
                )));
            }
            debug!(path = ?path, transactions = block.transactions.len(), "Recovered block");
            chain.push(block);
        }
        Ok(chain)
    }

    /// Number of blocks after genesis
    pub fn height(&self) -> usize {
        self.chain.read().len().saturating_sub(1)
    }

    /// Snapshot of the world state
    pub fn world_state(&self) -> WorldState {
        self.world_state.read().clone()
    }
}

fn write_block(path: &Path, block: &Block) -> Result<()> {
    let encoded = serde_json::to_vec_pretty(block)
        .map_err(|e| CoreError::serialization(e.to_string()))?;
    // write then rename so a crash never leaves a truncated block behind
    let partial = path.with_extension("json.partial");
    std::fs::write(&partial, encoded)
        .map_err(|e| CoreError::ledger(format!("writing {:?}: {}", partial, e)))?;
    std::fs::rename(&partial, path)
        .map_err(|e| CoreError::ledger(format!("renaming {:?}: {}", partial, e)))
}

impl Ledger for FileLedger {
    fn append_block(&self, block: &Block) -> Result<()> {
        let mut chain = self.chain.write();
        let path = block_file(&self.blocks_dir, chain.len());
        write_block(&path, block)?;
        let applied = self.world_state.write().apply_block(block);
        debug!(path = ?path, applied, "Block appended");
        chain.push(block.clone());
        Ok(())
    }

    fn load_recovered_chain(&self) -> Result<Vec<Block>> {
        Ok(self.chain.read().clone())
    }

    fn balance(&self, account: &str) -> Option<u64> {
        self.world_state.read().balance(account)
    }
}
