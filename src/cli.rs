//! # Reseal CLI
//!
//! Command-line surface of the `reseal` binary.
//!
//! ## Usage
//!
//! ```bash
//! # Re-seal every SealedSecret in one namespace
//! reseal --namespace team
//!
//! # Preview a cluster-wide run, listing every item that would not be updated
//! reseal --all-namespaces --dry-run --verbose
//!
//! # Read keys from a URL instead of the controller's service proxy
//! reseal -A --key-url https://sealed-secrets.example.com/v1/keys
//! ```
//!
//! Tuning knobs not exposed as flags come from `REKEY_*` environment
//! variables (see [`RunConfig::from_env`]).

use crate::config::{parse_kubernetes_duration, KeyEndpoint, RunConfig, Scope};
use crate::constants::{
    DEFAULT_CONCURRENCY, DEFAULT_CONTROLLER_NAME, DEFAULT_CONTROLLER_NAMESPACE,
    DEFAULT_CONTROLLER_PORT, DEFAULT_KEY_PATH,
};
use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// Re-encrypt SealedSecrets under the sealing controller's active key
#[derive(Debug, Parser)]
#[command(name = "reseal", version)]
#[command(about = "Re-encrypt SealedSecrets under the active sealing key", long_about = None)]
#[command(group(ArgGroup::new("scope").required(true).args(["namespace", "all_namespaces"])))]
pub struct Cli {
    /// Only re-seal SealedSecrets in this namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Re-seal SealedSecrets in every namespace
    #[arg(short = 'A', long)]
    pub all_namespaces: bool,

    /// Label selector restricting which SealedSecrets are processed
    #[arg(short = 'l', long)]
    pub selector: Option<String>,

    /// Number of SealedSecrets processed in parallel
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Compute outcomes without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Debug logging, and list every item that was not updated
    #[arg(short, long)]
    pub verbose: bool,

    /// Fetch public keys from this URL instead of the controller service
    #[arg(long, conflicts_with_all = ["controller_namespace", "controller_name", "controller_port", "key_path"])]
    pub key_url: Option<String>,

    /// Namespace of the sealing controller service
    #[arg(long, default_value = DEFAULT_CONTROLLER_NAMESPACE)]
    pub controller_namespace: String,

    /// Name of the sealing controller service
    #[arg(long, default_value = DEFAULT_CONTROLLER_NAME)]
    pub controller_name: String,

    /// Port (name or number) of the sealing controller service
    #[arg(long, default_value = DEFAULT_CONTROLLER_PORT)]
    pub controller_port: String,

    /// Path of the key document on the controller service
    #[arg(long, default_value = DEFAULT_KEY_PATH)]
    pub key_path: String,

    /// Abort the run after this long (e.g. 30s, 10m, 1h)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Write Prometheus metrics to this file when the run ends
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Items requested per listing page [env: REKEY_PAGE_SIZE]
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Sustained cluster API requests per second [env: REKEY_API_QPS]
    #[arg(long)]
    pub api_qps: Option<f64>,

    /// Cluster API request burst [env: REKEY_API_BURST]
    #[arg(long)]
    pub api_burst: Option<u32>,

    /// Reconcile cycles per item before giving up on conflicts [env: REKEY_MAX_CONFLICT_ATTEMPTS]
    #[arg(long)]
    pub max_conflict_attempts: Option<u32>,

    /// Also replace ciphertext without an embedded key fingerprint (written by another sealer)
    #[arg(long)]
    pub reseal_foreign: bool,
}

impl Cli {
    /// Build and validate the run configuration, flags over environment
    pub fn into_config(self) -> Result<RunConfig> {
        let mut config = RunConfig::from_env();

        let scope = match self.namespace {
            Some(namespace) if !self.all_namespaces => Scope::namespace(namespace),
            _ => Scope::all_namespaces(),
        };
        config.scope = match self.selector {
            Some(selector) => scope.with_selector(selector),
            None => scope,
        };

        config.concurrency = self.concurrency;
        config.dry_run = self.dry_run;
        config.verbose = self.verbose;
        config.metrics_file = self.metrics_file;
        config.reseal_foreign = self.reseal_foreign;

        config.key_endpoint = match self.key_url {
            Some(url) => KeyEndpoint::Url(url),
            None => KeyEndpoint::ServiceProxy {
                namespace: self.controller_namespace,
                service: self.controller_name,
                port: self.controller_port,
                path: self.key_path,
            },
        };

        if let Some(timeout) = self.timeout {
            config.timeout = Some(
                parse_kubernetes_duration(&timeout)
                    .with_context(|| format!("Invalid --timeout '{timeout}'"))?,
            );
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(qps) = self.api_qps {
            config.rate_limit.qps = qps;
        }
        if let Some(burst) = self.api_burst {
            config.rate_limit.burst = burst;
        }
        if let Some(attempts) = self.max_conflict_attempts {
            config.retry.max_conflict_attempts = attempts;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
