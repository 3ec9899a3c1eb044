//! DepChain Replica Node Library
//!
//! Process-level wiring for one replica: TOML configuration and the static
//! membership file, the file-backed ledger with its world state, and the
//! [`ReplicaNode`] that binds UDP links and runs the replica.

pub mod config;
pub mod ledger;
pub mod node;

pub use config::{MembershipFile, NodeConfig, Participant};
pub use ledger::FileLedger;
pub use node::ReplicaNode;
