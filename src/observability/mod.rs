//! # Observability
//!
//! Metrics for re-encryption runs. Structured logging is configured in
//! [`crate::runtime::initialization`].

pub mod metrics;
