//! # Reconciler
//!
//! Per-item decision: read the dependent plaintext, decide staleness and
//! compute the replacement ciphertext.
//!
//! The reconciler never writes. It hands the new mapping and the version it
//! was derived from to the [`Applier`](super::applier::Applier).

use super::budget::{ApiBudget, CallError};
use super::types::{EncryptedResourceRef, KeyMaterial};
use crate::cluster::{ClusterError, PlaintextSource};
use crate::sealing::{SealError, Sealer};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// What to do with one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Already sealed under the active key
    UpToDate,
    /// No plaintext Secret to re-seal from
    MissingDependent,
    /// Replace the encrypted data, conditional on `expected_version`
    Reseal {
        encrypted_data: BTreeMap<String, String>,
        expected_version: String,
    },
}

/// Failure while reconciling one item
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("encryption failed: {0}")]
    Encryption(#[from] SealError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("fields {0:?} are sealed in a foreign format")]
    ForeignFormat(Vec<String>),
    #[error("cancelled")]
    Cancelled,
}

impl From<CallError<ClusterError>> for ItemError {
    fn from(err: CallError<ClusterError>) -> Self {
        match err {
            CallError::Cancelled => ItemError::Cancelled,
            CallError::Failed(e) => ItemError::Cluster(e),
        }
    }
}

pub struct Reconciler {
    plaintext: Arc<dyn PlaintextSource>,
    sealer: Arc<dyn Sealer>,
    budget: Arc<ApiBudget>,
    /// Replace ciphertext that carries no key fingerprint
    reseal_foreign: bool,
}

impl Reconciler {
    pub fn new(
        plaintext: Arc<dyn PlaintextSource>,
        sealer: Arc<dyn Sealer>,
        budget: Arc<ApiBudget>,
        reseal_foreign: bool,
    ) -> Self {
        Self {
            plaintext,
            sealer,
            budget,
            reseal_foreign,
        }
    }

    /// Decide what `resource` needs under `key`
    ///
    /// The plaintext snapshot lives only for the duration of this call.
    pub async fn reconcile(
        &self,
        resource: &EncryptedResourceRef,
        key: &KeyMaterial,
    ) -> Result<Decision, ItemError> {
        let source = &self.plaintext;
        let (namespace, name) = (resource.namespace.as_str(), resource.name.as_str());
        let snapshot = self
            .budget
            .call("get-plaintext", move || source.get_plaintext(namespace, name))
            .await?;

        let Some(snapshot) = snapshot else {
            debug!("plaintext Secret not found");
            return Ok(Decision::MissingDependent);
        };

        if resource.sealed_under(self.sealer.as_ref(), key.fingerprint) {
            return Ok(Decision::UpToDate);
        }
        if resource.encrypted_data.is_empty() && snapshot.data.is_empty() {
            // Nothing sealed, nothing to seal
            return Ok(Decision::UpToDate);
        }

        if !self.reseal_foreign {
            let foreign: Vec<String> = resource
                .embedded_fingerprints(self.sealer.as_ref())
                .into_iter()
                .filter_map(|(field, fingerprint)| fingerprint.is_none().then_some(field))
                .collect();
            if !foreign.is_empty() {
                return Err(ItemError::ForeignFormat(foreign));
            }
        }

        let binding = snapshot.binding(resource);
        debug!(
            binding = %binding,
            fields = snapshot.data.len(),
            "sealing plaintext under active key"
        );
        let encrypted_data = self.sealer.seal(&snapshot.data, key, &binding)?;

        if !encrypted_data.keys().eq(snapshot.data.keys()) {
            return Err(SealError::FieldSetMismatch {
                expected: snapshot.data.keys().cloned().collect(),
                actual: encrypted_data.keys().cloned().collect(),
            }
            .into());
        }

        Ok(Decision::Reseal {
            encrypted_data,
            expected_version: resource.resource_version.clone(),
        })
    }
}
