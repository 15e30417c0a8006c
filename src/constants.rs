//! # Constants
//!
//! Default values for run tuning and well-known names used against the cluster.

/// Field manager / user agent recorded on writes
pub const FIELD_MANAGER: &str = "sealed-secret-rekeyer";

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "sealed_secret_rekeyer=info";

/// Log filter used with `--verbose`
pub const VERBOSE_LOG_FILTER: &str = "sealed_secret_rekeyer=debug";

// Worker pool and listing

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_PAGE_SIZE: u32 = 100;

// Retry ceilings

pub const DEFAULT_MAX_CONFLICT_ATTEMPTS: u32 = 3;
pub const DEFAULT_MAX_TRANSPORT_ATTEMPTS: u32 = 5;

// Backoff (milliseconds)

pub const DEFAULT_BACKOFF_BASE_MS: u64 = 200;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 5_000;
pub const DEFAULT_CONFLICT_JITTER_MS: u64 = 250;

// Cluster API request budget

pub const DEFAULT_API_QPS: f64 = 20.0;
pub const DEFAULT_API_BURST: u32 = 40;
/// Slowest accepted request rate; one request every ten seconds
pub const MIN_API_QPS: f64 = 0.1;

// Sealing controller key endpoint

pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "kube-system";
pub const DEFAULT_CONTROLLER_NAME: &str = "sealed-secrets-controller";
pub const DEFAULT_CONTROLLER_PORT: &str = "http";
pub const DEFAULT_KEY_PATH: &str = "/v1/keys";

// SealedSecret scope annotations

pub const ANNOTATION_NAMESPACE_WIDE: &str = "sealedsecrets.bitnami.com/namespace-wide";
pub const ANNOTATION_CLUSTER_WIDE: &str = "sealedsecrets.bitnami.com/cluster-wide";

/// Secret type assumed when neither the plaintext nor the template names one
pub const DEFAULT_SECRET_TYPE: &str = "Opaque";
