//! # Applier
//!
//! Conditional write of new encrypted data.
//!
//! The write only takes effect if the stored resource version still equals
//! the version the reconcile attempt started from. A mismatch comes back as
//! [`ApplyError::VersionConflict`] and the caller decides whether to run
//! another reconcile cycle.

use super::budget::{ApiBudget, CallError};
use super::types::EncryptedResourceRef;
use crate::cluster::{ClusterError, EncryptedResourceStore};
use crate::observability::metrics;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Result of a successful apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Written; carries the new resource version
    Written { resource_version: String },
    /// Dry-run: the write was skipped
    Skipped,
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("resource version changed since it was read")]
    VersionConflict,
    #[error(transparent)]
    Cluster(ClusterError),
    #[error("cancelled")]
    Cancelled,
}

pub struct Applier {
    store: Arc<dyn EncryptedResourceStore>,
    budget: Arc<ApiBudget>,
    dry_run: bool,
}

impl Applier {
    pub fn new(
        store: Arc<dyn EncryptedResourceStore>,
        budget: Arc<ApiBudget>,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            budget,
            dry_run,
        }
    }

    /// Replace the encrypted data of `resource` if it is still at `expected_version`
    pub async fn apply(
        &self,
        resource: &EncryptedResourceRef,
        encrypted_data: &BTreeMap<String, String>,
        expected_version: &str,
    ) -> Result<Applied, ApplyError> {
        if self.dry_run {
            info!(
                fields = encrypted_data.len(),
                expected_version, "dry-run: skipping write"
            );
            return Ok(Applied::Skipped);
        }

        let store = &self.store;
        let result = self
            .budget
            .call("write", move || {
                metrics::increment_write_attempts_total();
                store.replace_encrypted_data(resource, encrypted_data, expected_version)
            })
            .await;

        match result {
            Ok(resource_version) => {
                debug!(
                    previous_version = expected_version,
                    resource_version = %resource_version,
                    "wrote re-sealed data"
                );
                Ok(Applied::Written { resource_version })
            }
            Err(CallError::Failed(ClusterError::Conflict)) => {
                metrics::increment_version_conflicts_total();
                Err(ApplyError::VersionConflict)
            }
            Err(CallError::Failed(err)) => Err(ApplyError::Cluster(err)),
            Err(CallError::Cancelled) => Err(ApplyError::Cancelled),
        }
    }
}
