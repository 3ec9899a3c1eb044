//! Byzantine read/write epoch consensus for DepChain
//!
//! A fixed set of replicas agrees, epoch by epoch, on the next block to
//! append to the ledger, tolerating `f` Byzantine replicas among `n >= 3f+1`.
//!
//! ## Protocol
//!
//! Each epoch is driven by the leader:
//! 1. **Read**: the leader broadcasts READ, every replica answers with STATE
//! 2. **Collect**: with `n - f` STATE replies the leader picks the value with
//!    the most recent write (or its own proposal)
//! 3. **Write**: the leader broadcasts WRITE, every replica adopts the value
//!    and broadcasts ACCEPT
//! 4. **Decide**: a replica decides once it holds `n - f` matching ACCEPTs
//!
//! A replica that times out, or sees `f + 1` ABORTs, gives up on the epoch
//! and broadcasts ABORT; the epoch aborts once `n - f` replicas gave up.
//!
//! ## Byzantine Detection
//!
//! Equivocation, impersonation of the leader and impossible STATE replies are
//! dropped by the dispatcher and counted by the [`ByzantineDetector`].

pub mod byzantine_detection;
pub mod config;
pub mod epoch;
pub mod error;
pub mod message;
pub mod metrics;
pub mod replica;
pub mod role;
pub mod state;

pub use byzantine_detection::{ByzantineDetector, Violation};
pub use config::ConsensusConfig;
pub use epoch::{EpochAction, EpochConsensus, StateReply};
pub use error::{ConsensusError, Result};
pub use message::{Abort, Accept, ConsensusMessage, Decide, Read, State, Write};
pub use metrics::ConsensusMetrics;
pub use replica::{Replica, ReplicaCore, ReplicaEvent};
pub use role::{BalanceReply, Dispatch, ReplicaRole, Role};
pub use state::{EpochPhase, EpochState, QuorumCertificate, VoteOutcome};
