//! # Sealing Capability
//!
//! The boundary between the re-encryption pipeline and the cryptography that
//! turns plaintext into ciphertext.
//!
//! The pipeline only ever hands a [`Sealer`] public key material, the binding
//! identity and the plaintext fields of one resource. No type in this module
//! (outside tests) represents a private key.
//!
//! ## Sub-modules
//!
//! - `binding` - Identity the ciphertext is authenticated against
//! - `fingerprint` - Stable key identifiers embedded in ciphertext
//! - `hybrid` - Default X25519 / ChaCha20-Poly1305 implementation

mod binding;
mod fingerprint;
mod hybrid;

pub use binding::{BindingIdentity, SealingScope};
pub use fingerprint::KeyFingerprint;
pub use hybrid::HybridSealer;

use crate::controller::types::KeyMaterial;
use std::collections::BTreeMap;
use thiserror::Error;

/// Failure inside the sealing capability
#[derive(Debug, Error)]
pub enum SealError {
    #[error("public key must be {expected} bytes, got {actual}")]
    InvalidPublicKey { expected: usize, actual: usize },
    #[error("key agreement produced a non-contributory shared secret")]
    NonContributory,
    #[error("failed to seal field '{field}': {message}")]
    Encrypt { field: String, message: String },
    #[error("sealed fields {actual:?} do not match plaintext fields {expected:?}")]
    FieldSetMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },
}

/// Encryption capability supplied by the sealing collaborator
///
/// `seal` must return a mapping covering exactly the keys of `fields`.
pub trait Sealer: Send + Sync {
    /// Seal every plaintext field under `key`, authenticated against `binding`
    fn seal(
        &self,
        fields: &BTreeMap<String, Vec<u8>>,
        key: &KeyMaterial,
        binding: &BindingIdentity,
    ) -> Result<BTreeMap<String, String>, SealError>;

    /// Fingerprint of the key a ciphertext was sealed with, when the format carries one
    fn embedded_fingerprint(&self, ciphertext: &str) -> Option<KeyFingerprint>;
}
