//! # Hybrid Sealer
//!
//! Sealed-box encryption against an X25519 public key.
//!
//! Each field gets a fresh ephemeral key pair. The shared secret is expanded
//! with HKDF-SHA256 into a ChaCha20-Poly1305 key, and the binding identity is
//! the AEAD associated data.
//!
//! Blob layout (base64 encoded):
//! `[version:1][fingerprint:8][ephemeral_pubkey:32][nonce:12][ciphertext][tag:16]`

use super::fingerprint::FINGERPRINT_LEN;
use super::{BindingIdentity, KeyFingerprint, SealError, Sealer};
use crate::controller::types::KeyMaterial;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::collections::BTreeMap;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroize;

pub const FORMAT_VERSION: u8 = 1;
pub const X25519_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + FINGERPRINT_LEN + X25519_KEY_LEN + NONCE_LEN;
const HKDF_INFO: &[u8] = b"sealed-secret-rekeyer/v1 field key";

/// Default [`Sealer`] implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct HybridSealer;

impl HybridSealer {
    pub fn new() -> Self {
        Self
    }

    fn seal_field(
        recipient: &PublicKey,
        fingerprint: KeyFingerprint,
        aad: &[u8],
        field: &str,
        plaintext: &[u8],
    ) -> Result<String, SealError> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(recipient);
        if !shared.was_contributory() {
            return Err(SealError::NonContributory);
        }

        let mut field_key = derive_field_key(
            shared.as_bytes(),
            ephemeral_public.as_bytes(),
            recipient.as_bytes(),
        )
        .map_err(|message| SealError::Encrypt {
            field: field.to_string(),
            message,
        })?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&field_key));
        field_key.zeroize();

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| SealError::Encrypt {
                field: field.to_string(),
                message: e.to_string(),
            })?;

        let mut blob = Vec::with_capacity(HEADER_LEN + sealed.len());
        blob.push(FORMAT_VERSION);
        blob.extend_from_slice(fingerprint.as_bytes());
        blob.extend_from_slice(ephemeral_public.as_bytes());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(STANDARD.encode(blob))
    }
}

impl Sealer for HybridSealer {
    fn seal(
        &self,
        fields: &BTreeMap<String, Vec<u8>>,
        key: &KeyMaterial,
        binding: &BindingIdentity,
    ) -> Result<BTreeMap<String, String>, SealError> {
        let key_bytes: [u8; X25519_KEY_LEN] =
            key.public_key
                .as_slice()
                .try_into()
                .map_err(|_| SealError::InvalidPublicKey {
                    expected: X25519_KEY_LEN,
                    actual: key.public_key.len(),
                })?;
        let recipient = PublicKey::from(key_bytes);
        let aad = binding.associated_data();

        fields
            .iter()
            .map(|(field, plaintext)| {
                Self::seal_field(&recipient, key.fingerprint, &aad, field, plaintext)
                    .map(|blob| (field.clone(), blob))
            })
            .collect()
    }

    fn embedded_fingerprint(&self, ciphertext: &str) -> Option<KeyFingerprint> {
        let blob = STANDARD.decode(ciphertext.trim()).ok()?;
        if blob.len() < HEADER_LEN + TAG_LEN || blob[0] != FORMAT_VERSION {
            return None;
        }
        let bytes: [u8; FINGERPRINT_LEN] = blob[1..=FINGERPRINT_LEN].try_into().ok()?;
        Some(KeyFingerprint::from_bytes(bytes))
    }
}

/// HKDF-SHA256 over the shared secret, salted with both public keys
fn derive_field_key(
    shared: &[u8],
    ephemeral_public: &[u8],
    recipient_public: &[u8],
) -> Result<[u8; 32], String> {
    let mut salt = Vec::with_capacity(ephemeral_public.len() + recipient_public.len());
    salt.extend_from_slice(ephemeral_public);
    salt.extend_from_slice(recipient_public);
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut okm)
        .map_err(|e| format!("failed to derive field key: {e}"))?;
    Ok(okm)
}
