//! Collaborator traits consumed by the replication core

pub mod ledger;
pub mod membership;

// Re-export commonly used traits
pub use ledger::{Ledger, MemoryLedger};
pub use membership::{max_faulty, MembershipOracle, StaticMembership};
