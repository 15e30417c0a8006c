//! # Key Endpoint
//!
//! Clients for the sealing controller's published public keys.
//!
//! The controller serves a JSON document listing its current key and the
//! historical keys it still decrypts with:
//!
//! ```json
//! {"keys": [{"id": "k2", "publicKey": "<base64 32 bytes>", "rotatedAt": "2026-10-01T00:00:00Z"}]}
//! ```

use super::{ClusterError, KeySource};
use crate::controller::key_provider::KeyFetchError;
use crate::runtime::error_policy::classify_kube_error;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Document served by the key endpoint
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDocument {
    #[serde(default)]
    pub keys: Vec<PublishedKey>,
}

/// One published public key
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedKey {
    pub id: String,
    /// Base64-encoded raw public key
    pub public_key: String,
    pub rotated_at: DateTime<Utc>,
}

/// Parse a key document body
pub fn parse_key_document(body: &str) -> Result<Vec<PublishedKey>, KeyFetchError> {
    let document: KeyDocument = serde_json::from_str(body)
        .map_err(|e| KeyFetchError::Malformed(format!("invalid key document: {e}")))?;
    Ok(document.keys)
}

fn cluster_to_fetch_error(err: ClusterError) -> KeyFetchError {
    match err {
        ClusterError::Unauthorized(message) => KeyFetchError::Unauthorized(message),
        other => KeyFetchError::Transport(other.to_string()),
    }
}

/// Reads keys through the API server's service proxy
///
/// Works from outside the cluster with nothing but kubeconfig credentials.
#[derive(Clone)]
pub struct ServiceProxyKeySource {
    client: Client,
    namespace: String,
    service: String,
    port: String,
    path: String,
}

impl ServiceProxyKeySource {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        service: impl Into<String>,
        port: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            service: service.into(),
            port: port.into(),
            path: path.into(),
        }
    }

    /// Proxy URI of the key document
    pub fn uri(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!(
            "/api/v1/namespaces/{}/services/http:{}:{}/proxy{}",
            self.namespace, self.service, self.port, path
        )
    }
}

#[async_trait]
impl KeySource for ServiceProxyKeySource {
    async fn published_keys(&self) -> Result<Vec<PublishedKey>, KeyFetchError> {
        let uri = self.uri();
        debug!(uri = %uri, "fetching published keys through service proxy");

        let request = http::Request::get(&uri)
            .header(http::header::ACCEPT, "application/json")
            .body(Vec::new())
            .map_err(|e| KeyFetchError::Transport(format!("invalid proxy request: {e}")))?;

        let body = self
            .client
            .request_text(request)
            .await
            .map_err(|e| cluster_to_fetch_error(classify_kube_error(&e)))?;

        parse_key_document(&body)
    }
}

/// Reads keys from a URL over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn published_keys(&self) -> Result<Vec<PublishedKey>, KeyFetchError> {
        debug!(url = %self.url, "fetching published keys");

        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| KeyFetchError::Transport(format!("{}: {e}", self.url)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(KeyFetchError::Unauthorized(format!("{}: HTTP {status}", self.url)));
        }
        if !status.is_success() {
            return Err(KeyFetchError::Transport(format!("{}: HTTP {status}", self.url)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| KeyFetchError::Transport(format!("{}: {e}", self.url)))?;
        parse_key_document(&body)
    }
}
