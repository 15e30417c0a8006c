//! # Metrics
//!
//! Prometheus metrics for re-encryption runs.
//!
//! A run is a batch job, so metrics are not served over HTTP. They are written
//! once at the end of the run in the text exposition format, for the
//! node-exporter textfile collector or a Pushgateway sidecar to pick up.

mod registry;
mod rekey_metrics;

pub use registry::REGISTRY;
pub use rekey_metrics::*;

use anyhow::{Context, Result};
use prometheus::{Encoder, TextEncoder};
use std::path::Path;

/// Register all metrics with the registry
pub fn register_metrics() -> Result<()> {
    rekey_metrics::register_rekey_metrics()
}

/// Render every registered metric in the text exposition format
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output was not valid UTF-8")
}

/// Write all metrics to `path`
///
/// The file is written next to its final name and renamed into place so a
/// collector never reads a partial file.
pub fn write_textfile(path: &Path) -> Result<()> {
    let body = render()?;
    let staging = path.with_extension("prom.tmp");
    std::fs::write(&staging, body)
        .with_context(|| format!("Failed to write metrics to {}", staging.display()))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("Failed to move metrics into {}", path.display()))?;
    Ok(())
}
