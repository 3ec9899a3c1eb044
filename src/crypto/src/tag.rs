//! Integrity tags binding a message id, its sender and its sealed body.
//!
//! [`TagScheme::Keyed`] uses BLAKE3 in keyed mode under a key derived from the
//! static-static X25519 secret of the two link endpoints, so only the two of
//! them can produce a valid tag. [`TagScheme::Digest`] is a plain BLAKE3
//! digest: it catches corruption but anyone holding the recipient's public key
//! can forge it, so it does not authenticate the sender.

use crate::error::{CryptoError, Result};
use crate::keys::{ReplicaKeyPair, KEY_LENGTH};
use serde::{Deserialize, Serialize};

const TAG_KEY_CONTEXT: &str = "depchain 2024-03 link integrity tag key";

/// Length of an integrity tag in bytes
pub const TAG_LENGTH: usize = 32;

/// Integrity tag over a wire message
pub type IntegrityTag = [u8; TAG_LENGTH];

/// How integrity tags are computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagScheme {
    /// Keyed BLAKE3 under the pairwise link key
    #[default]
    Keyed,
    /// Unkeyed BLAKE3 digest
    Digest,
}

/// Computes and checks tags for one link
#[derive(Clone)]
pub struct IntegrityTagger {
    scheme: TagScheme,
    key: [u8; 32],
}

impl IntegrityTagger {
    /// Tagger for the link between `local` and the peer owning `peer_public`.
    ///
    /// Both endpoints derive the same key.
    pub fn new(
        scheme: TagScheme,
        local: &ReplicaKeyPair,
        peer_public: &[u8; KEY_LENGTH],
    ) -> Result<Self> {
        let key = match scheme {
            TagScheme::Keyed => {
                let shared = local.diffie_hellman(peer_public)?;
                blake3::derive_key(TAG_KEY_CONTEXT, &shared)
            }
            TagScheme::Digest => [0u8; 32],
        };
        Ok(Self { scheme, key })
    }

    /// Scheme in use
    pub fn scheme(&self) -> TagScheme {
        self.scheme
    }

    /// Tag over `(id, sender, body)`
    pub fn tag(&self, id: &[u8], sender: &str, body: &[u8]) -> IntegrityTag {
        let mut hasher = match self.scheme {
            TagScheme::Keyed => blake3::Hasher::new_keyed(&self.key),
            TagScheme::Digest => blake3::Hasher::new(),
        };
        for part in [id, sender.as_bytes(), body] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        *hasher.finalize().as_bytes()
    }

    /// Check a received tag in constant time
    pub fn verify(&self, id: &[u8], sender: &str, body: &[u8], tag: &IntegrityTag) -> Result<()> {
        let expected = blake3::Hash::from(self.tag(id, sender, body));
        if expected == blake3::Hash::from(*tag) {
            Ok(())
        } else {
            Err(CryptoError::TagMismatch)
        }
    }
}
