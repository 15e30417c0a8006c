//! # Kubernetes Implementation
//!
//! kube-rs implementations of [`EncryptedResourceStore`] and [`PlaintextSource`].

use super::{ClusterError, EncryptedResourceStore, PlaintextSource, ResourcePage};
use crate::config::Scope;
use crate::constants::FIELD_MANAGER;
use crate::controller::types::{EncryptedResourceRef, PlainSnapshot};
use crate::crd::SealedSecret;
use crate::runtime::error_policy::classify_kube_error;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Cluster access through a kube [`Client`]
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn sealed_secrets(&self, namespace: Option<&str>) -> Api<SealedSecret> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Merge patch that swaps the encrypted-data mapping under a version precondition
///
/// Merge patches merge maps key by key, so fields dropped from the plaintext
/// are removed explicitly with `null`.
pub(crate) fn encrypted_data_patch(
    current: &BTreeMap<String, String>,
    replacement: &BTreeMap<String, String>,
    expected_version: &str,
) -> Value {
    let mut encrypted = Map::new();
    for field in current.keys() {
        if !replacement.contains_key(field) {
            encrypted.insert(field.clone(), Value::Null);
        }
    }
    for (field, blob) in replacement {
        encrypted.insert(field.clone(), Value::String(blob.clone()));
    }

    json!({
        "metadata": { "resourceVersion": expected_version },
        "spec": { "encryptedData": encrypted }
    })
}

#[async_trait]
impl EncryptedResourceStore for KubeCluster {
    async fn list_page(
        &self,
        scope: &Scope,
        limit: u32,
        continue_token: Option<&str>,
    ) -> Result<ResourcePage, ClusterError> {
        let api = self.sealed_secrets(scope.namespace.as_deref());

        let mut params = ListParams::default().limit(limit);
        if let Some(selector) = scope.label_selector.as_deref() {
            params = params.labels(selector);
        }
        if let Some(token) = continue_token {
            params = params.continue_token(token);
        }

        let list = api.list(&params).await.map_err(|e| classify_kube_error(&e))?;

        let listed = list.items.len();
        let items: Vec<EncryptedResourceRef> = list
            .items
            .iter()
            .filter_map(EncryptedResourceRef::from_resource)
            .collect();
        if items.len() != listed {
            warn!(
                listed,
                usable = items.len(),
                "dropped listed SealedSecrets without name, namespace or resourceVersion"
            );
        }

        let continue_token = list.metadata.continue_.filter(|t| !t.is_empty());
        debug!(
            items = items.len(),
            more = continue_token.is_some(),
            "listed SealedSecret page"
        );

        Ok(ResourcePage {
            items,
            continue_token,
        })
    }

    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EncryptedResourceRef>, ClusterError> {
        let resource = self
            .sealed_secrets(Some(namespace))
            .get_opt(name)
            .await
            .map_err(|e| classify_kube_error(&e))?;
        Ok(resource.as_ref().and_then(EncryptedResourceRef::from_resource))
    }

    async fn replace_encrypted_data(
        &self,
        resource: &EncryptedResourceRef,
        encrypted_data: &BTreeMap<String, String>,
        expected_version: &str,
    ) -> Result<String, ClusterError> {
        let patch = encrypted_data_patch(&resource.encrypted_data, encrypted_data, expected_version);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PatchParams::default()
        };

        let updated = self
            .sealed_secrets(Some(&resource.namespace))
            .patch(&resource.name, &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| classify_kube_error(&e))?;

        Ok(updated.metadata.resource_version.unwrap_or_default())
    }
}

#[async_trait]
impl PlaintextSource for KubeCluster {
    async fn get_plaintext(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PlainSnapshot>, ClusterError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets
            .get_opt(name)
            .await
            .map_err(|e| classify_kube_error(&e))?;

        Ok(secret.map(|secret| PlainSnapshot {
            namespace: namespace.to_string(),
            name: name.to_string(),
            secret_type: secret.type_,
            data: secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(field, bytes)| (field, bytes.0))
                .collect(),
        }))
    }
}
