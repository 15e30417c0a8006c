//! # Controller
//!
//! The re-encryption pipeline.
//!
//! ## Sub-modules
//!
//! - `types` - Resource references, plaintext snapshots, key material and outcomes
//! - `key_provider` - Fetches and selects the active public key
//! - `enumerator` - Lazy, paginated discovery of encrypted resources
//! - `reconciler` - Per-item staleness decision and re-sealing
//! - `applier` - Conditional write with optimistic concurrency
//! - `orchestrator` - Worker pool, cancellation and the conflict retry loop
//! - `reporter` - Outcome aggregation and run summary
//! - `budget` - Shared rate limit, transient retries and cancellation for API calls
//! - `backoff` - Retry delay calculation

pub mod applier;
pub mod backoff;
pub mod budget;
pub mod enumerator;
pub mod key_provider;
pub mod orchestrator;
pub mod reconciler;
pub mod reporter;
pub mod types;

pub use orchestrator::{Collaborators, Orchestrator, RunError};
pub use reporter::RunSummary;
