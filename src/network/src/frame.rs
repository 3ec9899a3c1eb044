//! Stubborn link wire frames

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Frame carried in one datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Payload under a link-local sequence number
    Data { seq: u64, payload: Vec<u8> },
    /// Acknowledgement of a data frame
    Ack { seq: u64 },
}

impl Frame {
    /// Encode with bincode
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode with bincode
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
