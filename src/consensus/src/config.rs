//! Consensus configuration

use std::time::Duration;

/// Replica runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusConfig {
    /// An epoch not decided within this time is aborted
    pub epoch_timeout: Duration,

    /// Interval of the leader's inbox status log
    pub status_interval: Duration,

    /// Finished epoch instances kept for late traffic
    pub retained_epochs: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            epoch_timeout: Duration::from_secs(5),
            status_interval: Duration::from_secs(5),
            retained_epochs: 16,
        }
    }
}
