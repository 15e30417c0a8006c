//! # Reconciliation Types
//!
//! Values that flow through one run: resource references, plaintext
//! snapshots, the active key and per-item outcomes.

use crate::constants::DEFAULT_SECRET_TYPE;
use crate::crd::SealedSecret;
use crate::sealing::{BindingIdentity, KeyFingerprint, Sealer, SealingScope};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroize;

/// Identity and current state of one encrypted resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedResourceRef {
    pub namespace: String,
    pub name: String,
    /// Optimistic-concurrency token observed when the resource was read
    pub resource_version: String,
    /// Field name -> ciphertext blob
    pub encrypted_data: BTreeMap<String, String>,
    /// Binding scope declared on the resource
    pub scope: SealingScope,
    /// Secret type from the resource's template, if any
    pub template_type: Option<String>,
}

impl EncryptedResourceRef {
    /// Build a reference from a listed or fetched SealedSecret
    ///
    /// Returns `None` for objects the API server would never hand out
    /// (missing name, namespace or resource version).
    pub fn from_resource(resource: &SealedSecret) -> Option<Self> {
        Some(Self {
            namespace: resource.metadata.namespace.clone()?,
            name: resource.metadata.name.clone()?,
            resource_version: resource.metadata.resource_version.clone()?,
            encrypted_data: resource.spec.encrypted_data.clone(),
            scope: resource.sealing_scope(),
            template_type: resource.template_type().map(str::to_string),
        })
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Fingerprints embedded in each field's ciphertext, where the format carries one
    pub fn embedded_fingerprints(
        &self,
        sealer: &dyn Sealer,
    ) -> BTreeMap<String, Option<KeyFingerprint>> {
        self.encrypted_data
            .iter()
            .map(|(field, blob)| (field.clone(), sealer.embedded_fingerprint(blob)))
            .collect()
    }

    /// True when every field is sealed under `fingerprint`
    ///
    /// An empty mapping is never current: there is nothing proving which key it used.
    pub fn sealed_under(&self, sealer: &dyn Sealer, fingerprint: KeyFingerprint) -> bool {
        !self.encrypted_data.is_empty()
            && self
                .embedded_fingerprints(sealer)
                .values()
                .all(|embedded| *embedded == Some(fingerprint))
    }
}

/// Point-in-time read of the dependent plaintext Secret
///
/// Owned by exactly one reconcile attempt. Bytes are wiped on drop and never
/// printed by `Debug`.
pub struct PlainSnapshot {
    pub namespace: String,
    pub name: String,
    pub secret_type: Option<String>,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl PlainSnapshot {
    /// Identity the new ciphertext is bound to
    ///
    /// The type comes from the plaintext, falling back to the resource
    /// template and finally to `Opaque`.
    pub fn binding(&self, resource: &EncryptedResourceRef) -> BindingIdentity {
        BindingIdentity {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            secret_type: self
                .secret_type
                .clone()
                .or_else(|| resource.template_type.clone())
                .unwrap_or_else(|| DEFAULT_SECRET_TYPE.to_string()),
            scope: resource.scope,
        }
    }
}

impl fmt::Debug for PlainSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainSnapshot")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("secret_type", &self.secret_type)
            .field("fields", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PlainSnapshot {
    /// Overwrite every plaintext value with zeros and empty it
    pub fn wipe(&mut self) {
        for value in self.data.values_mut() {
            value.zeroize();
        }
    }
}

impl Drop for PlainSnapshot {
    fn drop(&mut self) {
        self.wipe();
    }
}

/// The active public key for a run
///
/// Fetched once before the worker pool starts and shared read-only.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Identifier published by the key endpoint
    pub id: String,
    pub fingerprint: KeyFingerprint,
    pub public_key: Vec<u8>,
    pub rotated_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

impl KeyMaterial {
    pub fn new(id: impl Into<String>, public_key: Vec<u8>, rotated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            fingerprint: KeyFingerprint::of_public_key(&public_key),
            public_key,
            rotated_at,
            fetched_at: Utc::now(),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint)
            .field("rotated_at", &self.rotated_at.to_rfc3339())
            .field("fetched_at", &self.fetched_at.to_rfc3339())
            .finish_non_exhaustive()
    }
}

/// Why an item ended in `failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The sealing capability rejected the plaintext or key
    Encryption(String),
    /// Every conditional write lost to a concurrent writer
    ConflictExhausted { attempts: u32 },
    /// A cluster call kept failing after its retry budget
    Transport(String),
    /// The encrypted resource disappeared between attempts
    ResourceDeleted,
    /// The cluster rejected our credentials
    Unauthorized(String),
    /// The run was cancelled before the item finished
    Cancelled,
    /// Existing ciphertext is not in a format this sealer writes
    ForeignFormat { fields: Vec<String> },
}

impl FailureReason {
    /// Short label used for metrics and summaries
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Encryption(_) => "encryption",
            FailureReason::ConflictExhausted { .. } => "conflict-exhausted",
            FailureReason::Transport(_) => "transport",
            FailureReason::ResourceDeleted => "resource-deleted",
            FailureReason::Unauthorized(_) => "unauthorized",
            FailureReason::Cancelled => "cancelled",
            FailureReason::ForeignFormat { .. } => "foreign-format",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Encryption(message)
            | FailureReason::Transport(message)
            | FailureReason::Unauthorized(message) => write!(f, "{}: {message}", self.as_str()),
            FailureReason::ConflictExhausted { attempts } => {
                write!(f, "{} after {attempts} attempts", self.as_str())
            }
            FailureReason::ForeignFormat { fields } => {
                write!(f, "{}: {}", self.as_str(), fields.join(", "))
            }
            FailureReason::ResourceDeleted | FailureReason::Cancelled => {
                f.write_str(self.as_str())
            }
        }
    }
}

/// Result of reconciling one encrypted resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// New ciphertext written (or, in dry-run, computed)
    Updated { dry_run: bool },
    SkippedUpToDate,
    SkippedMissingDependent,
    Failed(FailureReason),
}

impl ReconcileOutcome {
    pub fn category(&self) -> OutcomeCategory {
        match self {
            ReconcileOutcome::Updated { .. } => OutcomeCategory::Updated,
            ReconcileOutcome::SkippedUpToDate => OutcomeCategory::UpToDate,
            ReconcileOutcome::SkippedMissingDependent => OutcomeCategory::MissingDependent,
            ReconcileOutcome::Failed(_) => OutcomeCategory::Failed,
        }
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileOutcome::Updated { dry_run: false } => f.write_str("updated"),
            ReconcileOutcome::Updated { dry_run: true } => f.write_str("updated (dry-run)"),
            ReconcileOutcome::SkippedUpToDate => f.write_str("skipped-up-to-date"),
            ReconcileOutcome::SkippedMissingDependent => {
                f.write_str("skipped-missing-dependent")
            }
            ReconcileOutcome::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

/// Outcome buckets counted by the reporter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutcomeCategory {
    Updated,
    UpToDate,
    MissingDependent,
    Failed,
}

impl OutcomeCategory {
    pub const ALL: [OutcomeCategory; 4] = [
        OutcomeCategory::Updated,
        OutcomeCategory::UpToDate,
        OutcomeCategory::MissingDependent,
        OutcomeCategory::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeCategory::Updated => "updated",
            OutcomeCategory::UpToDate => "skipped-up-to-date",
            OutcomeCategory::MissingDependent => "skipped-missing-dependent",
            OutcomeCategory::Failed => "failed",
        }
    }
}

/// One finished item as seen by the reporter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub namespace: String,
    pub name: String,
    pub outcome: ReconcileOutcome,
    /// Reconcile-then-apply cycles used
    pub attempts: u32,
}
