//! # Key Provider
//!
//! Obtains the single active public key for a run.
//!
//! The key endpoint publishes the current key together with historical keys the
//! sealing controller still needs for decryption. The key with the newest
//! rotation timestamp is active. When two keys share that timestamp the
//! provider refuses to choose, since sealing under the wrong key would strand
//! every updated resource.

use super::budget::{ApiBudget, CallError};
use super::types::KeyMaterial;
use crate::cluster::{KeySource, PublishedKey};
use crate::sealing::KeyFingerprint;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Raw public key length accepted from the endpoint (X25519)
pub const PUBLIC_KEY_LEN: usize = 32;

/// The key endpoint could not supply a usable key
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyFetchError {
    #[error("key endpoint unreachable: {0}")]
    Transport(String),
    #[error("not authorized to read the key endpoint: {0}")]
    Unauthorized(String),
    #[error("malformed key endpoint response: {0}")]
    Malformed(String),
    #[error("key endpoint published no keys")]
    NoKeys,
    #[error("published key '{id}' is invalid: {reason}")]
    InvalidKey { id: String, reason: String },
    #[error("cancelled while fetching keys")]
    Cancelled,
}

impl KeyFetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, KeyFetchError::Transport(_))
    }
}

/// More than one key claims to be the newest
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("keys {} share the newest rotation timestamp {rotated_at}", ids.join(", "))]
pub struct AmbiguousKeyError {
    pub ids: Vec<String>,
    pub rotated_at: DateTime<Utc>,
}

/// Either way the run cannot start
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error(transparent)]
    Fetch(#[from] KeyFetchError),
    #[error(transparent)]
    Ambiguous(#[from] AmbiguousKeyError),
}

/// Fetches and selects the active key
pub struct KeyProvider {
    source: Arc<dyn KeySource>,
    budget: Arc<ApiBudget>,
}

impl KeyProvider {
    pub fn new(source: Arc<dyn KeySource>, budget: Arc<ApiBudget>) -> Self {
        Self { source, budget }
    }

    /// Fetch the published keys and select the active one
    pub async fn fetch_active_key(&self) -> Result<KeyMaterial, KeyError> {
        let source = &self.source;
        let published = self
            .budget
            .call("key-fetch", move || source.published_keys())
            .await
            .map_err(|err| match err {
                CallError::Cancelled => KeyFetchError::Cancelled,
                CallError::Failed(e) => e,
            })?;

        debug!(published = published.len(), "fetched published keys");
        let key = select_active_key(published)?;
        info!(
            key.id = %key.id,
            key.fingerprint = %key.fingerprint,
            key.rotated_at = %key.rotated_at.to_rfc3339(),
            "selected active sealing key"
        );
        Ok(key)
    }
}

/// Pick the key with the newest rotation timestamp
///
/// Every published key is decoded and length-checked, not only the winner:
/// a malformed document is reported as such rather than silently ignored.
pub fn select_active_key(published: Vec<PublishedKey>) -> Result<KeyMaterial, KeyError> {
    let mut decoded = Vec::with_capacity(published.len());
    for key in published {
        let bytes = BASE64
            .decode(key.public_key.trim())
            .map_err(|e| KeyFetchError::InvalidKey {
                id: key.id.clone(),
                reason: format!("invalid base64: {e}"),
            })?;
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(KeyFetchError::InvalidKey {
                id: key.id,
                reason: format!("expected {PUBLIC_KEY_LEN} bytes, got {}", bytes.len()),
            }
            .into());
        }
        decoded.push((key.id, bytes, key.rotated_at));
    }

    let newest = decoded
        .iter()
        .map(|(_, _, rotated_at)| *rotated_at)
        .max()
        .ok_or(KeyFetchError::NoKeys)?;

    let mut candidates: Vec<_> = decoded
        .into_iter()
        .filter(|(_, _, rotated_at)| *rotated_at == newest)
        .collect();

    if candidates.len() > 1 {
        // The same key republished under two ids is still one key
        let first = KeyFingerprint::of_public_key(&candidates[0].1);
        if candidates
            .iter()
            .any(|(_, bytes, _)| KeyFingerprint::of_public_key(bytes) != first)
        {
            let mut ids: Vec<String> = candidates.into_iter().map(|(id, _, _)| id).collect();
            ids.sort();
            return Err(AmbiguousKeyError {
                ids,
                rotated_at: newest,
            }
            .into());
        }
    }

    let (id, bytes, rotated_at) = candidates.swap_remove(0);
    Ok(KeyMaterial::new(id, bytes, rotated_at))
}
