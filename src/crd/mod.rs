//! # Custom Resource Definitions
//!
//! CRD types for the encrypted resources this tool re-seals.
//!
//! `SealedSecret` is owned by the sealing controller; this crate only lists,
//! reads and conditionally updates its `encryptedData`.

use crate::constants::{ANNOTATION_CLUSTER_WIDE, ANNOTATION_NAMESPACE_WIDE};
use crate::sealing::SealingScope;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// SealedSecret Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: bitnami.com/v1alpha1
/// kind: SealedSecret
/// metadata:
///   name: db-creds
///   namespace: team
/// spec:
///   encryptedData:
///     username: AQ3x...
///     password: AQ9f...
///   template:
///     type: Opaque
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "SealedSecret",
    group = "bitnami.com",
    version = "v1alpha1",
    namespaced,
    shortname = "sealed"
)]
#[serde(rename_all = "camelCase")]
pub struct SealedSecretSpec {
    /// Field name -> base64 ciphertext
    #[serde(default)]
    pub encrypted_data: BTreeMap<String, String>,
    /// Shape of the Secret the sealing controller produces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<SecretTemplateSpec>,
}

/// Template for the unsealed Secret
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretTemplateSpec {
    /// Secret type (e.g. `Opaque`, `kubernetes.io/tls`)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TemplateMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl SealedSecret {
    /// Binding scope declared by the scope annotations
    ///
    /// Cluster-wide wins over namespace-wide when both are set.
    pub fn sealing_scope(&self) -> SealingScope {
        let flag = |key: &str| {
            self.metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(key))
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        };

        if flag(ANNOTATION_CLUSTER_WIDE) {
            SealingScope::ClusterWide
        } else if flag(ANNOTATION_NAMESPACE_WIDE) {
            SealingScope::NamespaceWide
        } else {
            SealingScope::Strict
        }
    }

    /// Secret type from the template, if declared
    pub fn template_type(&self) -> Option<&str> {
        self.spec.template.as_ref().and_then(|t| t.type_.as_deref())
    }
}
