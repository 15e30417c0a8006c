//! # Initialization
//!
//! Process setup for a run: rustls provider, tracing, metrics registration,
//! Kubernetes client and the collaborators the pipeline talks to.

use crate::cluster::{
    EncryptedResourceStore, HttpKeySource, KeySource, KubeCluster, ServiceProxyKeySource,
};
use crate::config::{KeyEndpoint, RunConfig};
use crate::constants::{DEFAULT_LOG_FILTER, VERBOSE_LOG_FILTER};
use crate::controller::Collaborators;
use crate::observability;
use crate::sealing::HybridSealer;
use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Install the rustls crypto provider and the tracing subscriber
///
/// `RUST_LOG` wins over the verbosity flag when set.
pub fn init_process(verbose: bool) {
    // Required for rustls 0.23+ when no default provider is set via features.
    // Err only means a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let default_filter = if verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Register metrics and connect to the cluster
pub async fn initialize(config: &RunConfig) -> Result<Collaborators> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        scope = %config.scope.describe(),
        "starting sealed-secret-rekeyer"
    );

    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;

    let keys = key_source(&config.key_endpoint, &client)?;
    Ok(cluster_collaborators(client, keys))
}

/// Wire one Kubernetes client into every cluster seam
pub fn cluster_collaborators(client: Client, keys: Arc<dyn KeySource>) -> Collaborators {
    let cluster = Arc::new(KubeCluster::new(client));
    Collaborators {
        store: Arc::clone(&cluster) as Arc<dyn EncryptedResourceStore>,
        plaintext: cluster,
        keys,
        sealer: Arc::new(HybridSealer::new()),
    }
}

fn key_source(endpoint: &KeyEndpoint, client: &Client) -> Result<Arc<dyn KeySource>> {
    Ok(match endpoint {
        KeyEndpoint::ServiceProxy {
            namespace,
            service,
            port,
            path,
        } => {
            let source =
                ServiceProxyKeySource::new(client.clone(), namespace, service, port, path);
            debug!(uri = %source.uri(), "reading keys through service proxy");
            Arc::new(source)
        }
        KeyEndpoint::Url(url) => {
            debug!(url = %url, "reading keys from URL");
            Arc::new(HttpKeySource::new(url.as_str())?)
        }
    })
}
