//! Link-layer errors. Transport faults are retried by the stubborn link and
//! never reach the consensus layer; these surface only at setup and shutdown.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Debug, Error)]
pub enum NetworkError {
    /// Datagram could not be handed to the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// The endpoint or link task is gone
    #[error("Link closed")]
    Closed,

    /// Frame or authenticated message failed to encode/decode
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Key agreement, sealing or tagging failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] depchain_crypto::CryptoError),
}

impl From<Box<bincode::ErrorKind>> for NetworkError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        NetworkError::Encoding(err.to_string())
    }
}
