//! Ledger sink/source consumed by the replication core

use crate::error::Result;
use crate::types::{Block, WorldState};
use parking_lot::RwLock;

/// Durable ledger. Appending a block is the commit point of a decided epoch.
pub trait Ledger: Send + Sync {
    /// Persist a decided block and apply it to the world state
    fn append_block(&self, block: &Block) -> Result<()>;

    /// Chain recovered at startup, genesis first
    fn load_recovered_chain(&self) -> Result<Vec<Block>>;

    /// Current balance of an account
    fn balance(&self, account: &str) -> Option<u64>;
}

/// Volatile ledger kept in memory
#[derive(Debug, Default)]
pub struct MemoryLedger {
    blocks: RwLock<Vec<Block>>,
    world_state: RwLock<WorldState>,
}

impl MemoryLedger {
    /// Create a ledger holding only the genesis block
    pub fn new(world_state: WorldState) -> Self {
        Self {
            blocks: RwLock::new(vec![Block::genesis()]),
            world_state: RwLock::new(world_state),
        }
    }

    /// Snapshot of the chain
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.read().clone()
    }
}

impl Ledger for MemoryLedger {
    fn append_block(&self, block: &Block) -> Result<()> {
        self.world_state.write().apply_block(block);
        self.blocks.write().push(block.clone());
        Ok(())
    }

    fn load_recovered_chain(&self) -> Result<Vec<Block>> {
        Ok(self.blocks())
    }

    fn balance(&self, account: &str) -> Option<u64> {
        self.world_state.read().balance(account)
    }
}
