//! Sealed envelopes: confidentiality for one recipient.
//!
//! Each envelope uses a fresh ephemeral X25519 key. The AEAD key is derived
//! with BLAKE3 from the ephemeral-static shared secret and both public keys,
//! then the plaintext is sealed with ChaCha20-Poly1305 under a random nonce.

use crate::error::{CryptoError, Result};
use crate::keys::{ReplicaKeyPair, KEY_LENGTH};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey};

const ENVELOPE_KEY_CONTEXT: &str = "depchain 2024-03 link envelope key";

/// Ciphertext readable only by the holder of the recipient's secret key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEnvelope {
    /// Sender's one-time public key
    pub ephemeral_public: [u8; KEY_LENGTH],
    /// 12-byte nonce for ChaCha20Poly1305
    pub nonce: [u8; 12],
    /// Ciphertext including the Poly1305 tag
    pub ciphertext: Vec<u8>,
}

fn envelope_key(
    shared: &[u8; KEY_LENGTH],
    ephemeral_public: &[u8; KEY_LENGTH],
    recipient_public: &[u8; KEY_LENGTH],
) -> [u8; 32] {
    let mut material = Vec::with_capacity(3 * KEY_LENGTH);
    material.extend_from_slice(shared);
    material.extend_from_slice(ephemeral_public);
    material.extend_from_slice(recipient_public);
    blake3::derive_key(ENVELOPE_KEY_CONTEXT, &material)
}

/// Seal `plaintext` for the owner of `recipient_public`
pub fn seal(recipient_public: &[u8; KEY_LENGTH], plaintext: &[u8]) -> Result<SealedEnvelope> {
    let ephemeral_secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret).to_bytes();
    let shared = ephemeral_secret.diffie_hellman(&PublicKey::from(*recipient_public));
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidPublicKey);
    }

    let key = envelope_key(shared.as_bytes(), &ephemeral_public, recipient_public);
    let cipher = ChaCha20Poly1305::new((&key).into());
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(SealedEnvelope {
        ephemeral_public,
        nonce: nonce.into(),
        ciphertext,
    })
}

/// Open an envelope addressed to `recipient`
pub fn open(recipient: &ReplicaKeyPair, envelope: &SealedEnvelope) -> Result<Vec<u8>> {
    let shared = recipient.diffie_hellman(&envelope.ephemeral_public)?;
    let key = envelope_key(
        &shared,
        &envelope.ephemeral_public,
        &recipient.public_key(),
    );
    let cipher = ChaCha20Poly1305::new((&key).into());
    cipher
        .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_ref())
        .map_err(|e| CryptoError::Decryption(e.to_string()))
}
