//! # DepChain Core
//!
//! Shared types, traits, and error handling for the DepChain replication core.
//! Everything the link layer and the epoch consensus exchange with the outside
//! world lives here: replica identities, the application [`Message`] and its
//! command vocabulary, ledger blocks, and the two external collaborators the
//! core consumes ([`MembershipOracle`] and [`Ledger`]).

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use traits::{max_faulty, Ledger, MembershipOracle, MemoryLedger, StaticMembership};
pub use types::{
    Block, Command, EpochNumber, Message, ReplicaId, Transaction, Value, WorldState,
};
