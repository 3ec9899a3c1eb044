//! Ledger types: transactions, blocks and the account world state

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// A single ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub receiver: String,
    pub amount: u64,
    pub data: String,
    pub signature: String,
}

impl Transaction {
    /// Create a transfer between two accounts
    pub fn transfer(sender: &str, receiver: &str, amount: u64) -> Self {
        Transaction {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
            data: String::new(),
            signature: String::new(),
        }
    }

    /// Create a data-only transaction that moves no funds
    pub fn opaque(data: &str) -> Self {
        Transaction {
            sender: String::new(),
            receiver: String::new(),
            amount: 0,
            data: data.to_string(),
            signature: String::new(),
        }
    }

    /// Whether this transaction moves funds between accounts
    pub fn is_transfer(&self) -> bool {
        self.amount > 0 && !self.sender.is_empty() && !self.receiver.is_empty()
    }
}

/// One committed block. Produced once per decided epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "previous_block_hash")]
    pub previous_hash: String,
    pub transactions: Vec<Transaction>,
    #[serde(rename = "block_hash")]
    pub hash: String,
}

impl Block {
    /// Previous-hash of the genesis block
    pub fn zero_hash() -> String {
        "0".repeat(64)
    }

    /// Create a block, computing its hash
    pub fn new(previous_hash: String, transactions: Vec<Transaction>) -> Self {
        let hash = Self::compute_hash(&previous_hash, &transactions);
        Block {
            previous_hash,
            transactions,
            hash,
        }
    }

    /// Genesis block with no transactions
    pub fn genesis() -> Self {
        Self::new(Self::zero_hash(), Vec::new())
    }

    /// Build the block for a decided value.
    ///
    /// A value is either a JSON array of transactions or opaque text, which
    /// becomes a single data-only transaction.
    pub fn from_value(previous_hash: String, value: &[u8]) -> Self {
        let transactions = match serde_json::from_slice::<Vec<Transaction>>(value) {
            Ok(transactions) => transactions,
            Err(_) => vec![Transaction::opaque(&String::from_utf8_lossy(value))],
        };
        Self::new(previous_hash, transactions)
    }

    /// BLAKE3 over the previous hash and the canonical JSON of the transactions
    pub fn compute_hash(previous_hash: &str, transactions: &[Transaction]) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(previous_hash.as_bytes());
        for tx in transactions {
            // Struct serialization cannot fail: all fields are plain strings and integers
            let encoded = serde_json::to_vec(tx).unwrap_or_default();
            hasher.update(&(encoded.len() as u64).to_le_bytes());
            hasher.update(&encoded);
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Check that the stored hash matches the content
    pub fn verify_hash(&self) -> bool {
        Self::compute_hash(&self.previous_hash, &self.transactions) == self.hash
    }
}

/// Account balances derived from the genesis allocation plus applied blocks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldState {
    accounts: BTreeMap<String, u64>,
}

impl WorldState {
    /// Create a world state from a genesis allocation
    pub fn new(accounts: BTreeMap<String, u64>) -> Self {
        WorldState { accounts }
    }

    /// Balance of an account, if it exists
    pub fn balance(&self, account: &str) -> Option<u64> {
        self.accounts.get(account).copied()
    }

    /// All accounts
    pub fn accounts(&self) -> &BTreeMap<String, u64> {
        &self.accounts
    }

    /// Apply every transfer of a block. Transfers from unknown accounts, with
    /// insufficient funds or overflowing the receiver's balance are skipped.
    pub fn apply_block(&mut self, block: &Block) -> usize {
        let mut applied = 0;
        for tx in block.transactions.iter().filter(|tx| tx.is_transfer()) {
            let available = self.balance(&tx.sender).unwrap_or(0);
            if available < tx.amount {
                warn!(
                    sender = %tx.sender,
                    receiver = %tx.receiver,
                    amount = tx.amount,
                    available,
                    "Skipping transfer with insufficient funds"
                );
                continue;
            }
            let credited = if tx.receiver == tx.sender {
                available
            } else {
                let current = self.balance(&tx.receiver).unwrap_or(0);
                match current.checked_add(tx.amount) {
                    Some(credited) => credited,
                    None => {
                        warn!(
                            receiver = %tx.receiver,
                            amount = tx.amount,
                            current,
                            "Skipping transfer that overflows the receiver's balance"
                        );
                        continue;
                    }
                }
            };
            self.accounts.insert(tx.sender.clone(), available - tx.amount);
            self.accounts.insert(tx.receiver.clone(), credited);
            applied += 1;
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_verification() {
        let block = Block::new(Block::zero_hash(), vec![Transaction::opaque("TX1")]);
        assert!(block.verify_hash());

        let mut tampered = block.clone();
        tampered.transactions[0].data = "TX2".to_string();
        assert!(!tampered.verify_hash());
    }

    #[test]
    fn test_block_hash_chains_previous() {
        let a = Block::new("a".repeat(64), vec![]);
        let b = Block::new("b".repeat(64), vec![]);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_block_from_opaque_value() {
        let block = Block::from_value(Block::zero_hash(), b"TX1");
        let data: Vec<_> = block.transactions.iter().map(|t| t.data.as_str()).collect();
        assert_eq!(data, vec!["TX1"]);
    }

    #[test]
    fn test_block_from_transaction_list() {
        let txs = vec![Transaction::transfer("alice", "bob", 5)];
        let value = serde_json::to_vec(&txs).unwrap();
        let block = Block::from_value(Block::zero_hash(), &value);
        assert_eq!(block.transactions, txs);
    }

    #[test]
    fn test_block_file_field_names() {
        let json = serde_json::to_value(Block::genesis()).unwrap();
        assert!(json.get("previous_block_hash").is_some());
        assert!(json.get("block_hash").is_some());
    }

    #[test]
    fn test_world_state_applies_transfers() {
        let mut state = WorldState::new(BTreeMap::from([
            ("alice".to_string(), 10),
            ("bob".to_string(), 0),
        ]));
        let block = Block::new(
            Block::zero_hash(),
            vec![
                Transaction::transfer("alice", "bob", 4),
                Transaction::transfer("bob", "carol", 100),
                Transaction::opaque("note"),
            ],
        );

        assert_eq!(state.apply_block(&block), 1);
        assert_eq!(state.balance("alice"), Some(6));
        assert_eq!(state.balance("bob"), Some(4));
        assert_eq!(state.balance("carol"), None);
    }

    #[test]
    fn test_transfer_overflowing_receiver_is_skipped() {
        let mut state = WorldState::new(BTreeMap::from([
            ("alice".to_string(), 10),
            ("whale".to_string(), u64::MAX - 5),
        ]));
        let block = Block::new(
            Block::zero_hash(),
            vec![
                Transaction::transfer("alice", "whale", 6),
                Transaction::transfer("alice", "whale", 5),
            ],
        );

        assert_eq!(state.apply_block(&block), 1);
        assert_eq!(state.balance("alice"), Some(5));
        assert_eq!(state.balance("whale"), Some(u64::MAX));
    }

    #[test]
    fn test_transfer_to_self_keeps_balance() {
        let mut state = WorldState::new(BTreeMap::from([("alice".to_string(), 10)]));
        let block = Block::new(
            Block::zero_hash(),
            vec![Transaction::transfer("alice", "alice", 7)],
        );

        assert_eq!(state.apply_block(&block), 1);
        assert_eq!(state.balance("alice"), Some(10));
    }
}
