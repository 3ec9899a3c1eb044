//! Long-term X25519 identity keys

use crate::error::{CryptoError, Result};
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};

/// Length of an X25519 key in bytes
pub const KEY_LENGTH: usize = 32;

/// Static X25519 key pair identifying one replica or client
#[derive(Clone)]
pub struct ReplicaKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl ReplicaKeyPair {
    /// Generate a fresh key pair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        ReplicaKeyPair { secret, public }
    }

    /// Rebuild a key pair from its secret scalar
    pub fn from_secret_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        ReplicaKeyPair { secret, public }
    }

    /// Rebuild a key pair from a hex-encoded secret
    pub fn from_secret_hex(encoded: &str) -> Result<Self> {
        Ok(Self::from_secret_bytes(decode_key_hex(encoded)?))
    }

    /// Public key bytes
    pub fn public_key(&self) -> [u8; KEY_LENGTH] {
        self.public.to_bytes()
    }

    /// Hex-encoded public key
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// Hex-encoded secret key
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    /// Static-static Diffie-Hellman with a peer.
    ///
    /// Fails on low-order peer keys, which would yield an all-zero secret.
    pub fn diffie_hellman(&self, peer_public: &[u8; KEY_LENGTH]) -> Result<[u8; KEY_LENGTH]> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(shared.to_bytes())
    }
}

impl fmt::Debug for ReplicaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaKeyPair")
            .field("public", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Decode a 32-byte key from hex
pub fn decode_key_hex(encoded: &str) -> Result<[u8; KEY_LENGTH]> {
    let bytes = hex::decode(encoded.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        CryptoError::InvalidKey(format!(
            "expected {} bytes, got {}",
            KEY_LENGTH,
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let a = ReplicaKeyPair::generate();
        let b = ReplicaKeyPair::generate();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_hex_roundtrip() {
        let keys = ReplicaKeyPair::generate();
        let restored = ReplicaKeyPair::from_secret_hex(&keys.secret_key_hex()).unwrap();
        assert_eq!(restored.public_key(), keys.public_key());
        assert_eq!(decode_key_hex(&keys.public_key_hex()).unwrap(), keys.public_key());
    }

    #[test]
    fn test_diffie_hellman_agrees() {
        let a = ReplicaKeyPair::generate();
        let b = ReplicaKeyPair::generate();
        assert_eq!(
            a.diffie_hellman(&b.public_key()).unwrap(),
            b.diffie_hellman(&a.public_key()).unwrap()
        );
    }

    #[test]
    fn test_rejects_low_order_key() {
        let a = ReplicaKeyPair::generate();
        assert!(matches!(
            a.diffie_hellman(&[0u8; KEY_LENGTH]),
            Err(CryptoError::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        assert!(decode_key_hex("abcd").is_err());
        assert!(decode_key_hex("not hex").is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let keys = ReplicaKeyPair::generate();
        let debug = format!("{:?}", keys);
        assert!(!debug.contains(&keys.secret_key_hex()));
    }
}
