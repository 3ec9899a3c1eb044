//! Shared types for the DepChain replication core

pub mod ledger;
pub mod message;
pub mod replica;

// Re-export commonly used types
pub use ledger::{Block, Transaction, WorldState};
pub use message::{Command, Message};
pub use replica::{EpochNumber, ReplicaId, Value};
