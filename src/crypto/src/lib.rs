//! # DepChain Cryptography Module
//!
//! Primitives behind the authenticated perfect links.
//!
//! ## Features
//!
//! - **Identity keys**: static X25519 key pairs, hex encoded in configuration
//! - **Sealed envelopes**: per-message ephemeral X25519 + ChaCha20-Poly1305
//! - **Integrity tags**: keyed BLAKE3 under a pairwise link key (or a plain digest)
//!
//! ## Module Structure
//!
//! ```text
//! crypto/
//! ├── keys/      - Identity key pairs
//! ├── envelope/  - Sealing for a single recipient
//! └── tag/       - Integrity tags
//! ```

pub mod envelope;
pub mod error;
pub mod keys;
pub mod tag;

pub use envelope::{open, seal, SealedEnvelope};
pub use error::{CryptoError, Result};
pub use keys::{decode_key_hex, ReplicaKeyPair, KEY_LENGTH};
pub use tag::{IntegrityTag, IntegrityTagger, TagScheme, TAG_LENGTH};
