//! # Cluster Access
//!
//! Traits for every external interface the pipeline consumes, plus the
//! Kubernetes-backed implementations.
//!
//! The reconcile pipeline only talks to these traits, so tests substitute
//! in-memory fakes and the CLI wires in [`KubeCluster`] and a [`KeySource`].
//!
//! ## Sub-modules
//!
//! - `kubernetes` - kube-rs implementations of the discovery, plaintext read and write APIs
//! - `keys` - Key endpoint clients (API server service proxy, direct URL)

mod keys;
mod kubernetes;

pub use keys::{parse_key_document, HttpKeySource, KeyDocument, PublishedKey, ServiceProxyKeySource};
pub use kubernetes::KubeCluster;

use crate::config::Scope;
use crate::controller::key_provider::KeyFetchError;
use crate::controller::types::{EncryptedResourceRef, PlainSnapshot};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Classified failure of a single cluster API call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("resource not found")]
    NotFound,
    #[error("resource version conflict")]
    Conflict,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Expired continuation token or resource version
    #[error("gone: {0}")]
    Gone(String),
    #[error("throttled by API server: {0}")]
    Throttled(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClusterError {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Throttled(_) | ClusterError::Transport(_))
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ResourcePage {
    pub items: Vec<EncryptedResourceRef>,
    /// Token for the next page; `None` on the last page
    pub continue_token: Option<String>,
}

/// Discovery and conditional write API over the encrypted resource type
#[async_trait]
pub trait EncryptedResourceStore: Send + Sync {
    /// List one page of encrypted resources within `scope`
    async fn list_page(
        &self,
        scope: &Scope,
        limit: u32,
        continue_token: Option<&str>,
    ) -> Result<ResourcePage, ClusterError>;

    /// Fetch the current state of one resource; `Ok(None)` when it no longer exists
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EncryptedResourceRef>, ClusterError>;

    /// Replace the encrypted-data mapping if the stored version still equals
    /// `expected_version`; returns the new resource version
    ///
    /// Fields of `resource` missing from `encrypted_data` are removed. A
    /// version mismatch is reported as [`ClusterError::Conflict`].
    async fn replace_encrypted_data(
        &self,
        resource: &EncryptedResourceRef,
        encrypted_data: &BTreeMap<String, String>,
        expected_version: &str,
    ) -> Result<String, ClusterError>;
}

/// Read API over the dependent plaintext resource type
#[async_trait]
pub trait PlaintextSource: Send + Sync {
    /// `Ok(None)` when the plaintext does not exist
    async fn get_plaintext(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PlainSnapshot>, ClusterError>;
}

/// Key endpoint exposing current and historical public keys
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn published_keys(&self) -> Result<Vec<PublishedKey>, KeyFetchError>;
}
