//! Error types for the cryptography module

use thiserror::Error;

/// Result type alias for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Invalid key format
    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    /// Invalid public key
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Integrity tag did not match
    #[error("Integrity tag mismatch")]
    TagMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(CryptoError::TagMismatch.to_string(), "Integrity tag mismatch");
        assert_eq!(
            CryptoError::InvalidKey("short".into()).to_string(),
            "Invalid key format: short"
        );
    }
}
