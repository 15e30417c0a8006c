//! # Sealed Secret Rekeyer
//!
//! Re-encrypts `SealedSecret` resources after the sealing controller rotates
//! its key, so every resource stays decryptable under the active key. Only the
//! public key is ever handled.
//!
//! ## Overview
//!
//! A run:
//!
//! 1. **Fetches the active key** - the newest key published by the sealing controller
//! 2. **Discovers SealedSecrets** - paginated, restricted by namespace and label selector
//! 3. **Reconciles each item** - reads the plaintext Secret, skips resources already
//!    sealed under the active key, re-seals the rest bound to the same identity
//! 4. **Applies conditionally** - writes only if the resource version is unchanged,
//!    re-running the whole cycle on conflict up to a ceiling
//! 5. **Reports** - counts per outcome and an exit code reflecting the worst outcome
//!
//! The pipeline consumes the cluster only through the traits in [`cluster`],
//! so it runs unchanged against in-memory fakes.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;
pub mod sealing;
