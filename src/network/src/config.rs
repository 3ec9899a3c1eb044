//! Link layer configuration

use depchain_crypto::TagScheme;
use std::time::Duration;

/// Link configuration shared by every link of a replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Interval between retransmissions of unacknowledged frames
    pub retransmit_interval: Duration,

    /// How integrity tags are computed
    pub tag_scheme: TagScheme,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            retransmit_interval: Duration::from_millis(200),
            tag_scheme: TagScheme::Keyed,
        }
    }
}
