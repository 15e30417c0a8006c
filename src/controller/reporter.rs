//! # Reporter
//!
//! Accumulates per-item outcomes into the run summary and exit status.
//!
//! The reporter is owned by a single task fed over a channel, so its counters
//! need no locking.

use super::orchestrator::RunError;
use super::types::{ItemReport, KeyMaterial, OutcomeCategory, ReconcileOutcome};
use crate::observability::metrics;
use crate::runtime::error_policy::{EXIT_FATAL, EXIT_ITEMS_NOT_CURRENT, EXIT_OK};
use crate::sealing::KeyFingerprint;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Collects item outcomes as workers finish them
#[derive(Debug, Default)]
pub struct Reporter {
    counts: BTreeMap<OutcomeCategory, usize>,
    items: Vec<ItemReport>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished item
    pub fn record(&mut self, report: ItemReport) {
        let category = report.outcome.category();
        *self.counts.entry(category).or_default() += 1;
        metrics::increment_items_total(category.as_str());

        match &report.outcome {
            ReconcileOutcome::Updated { dry_run } => info!(
                resource.namespace = %report.namespace,
                resource.name = %report.name,
                attempts = report.attempts,
                dry_run = *dry_run,
                "re-sealed"
            ),
            ReconcileOutcome::SkippedUpToDate => debug!(
                resource.namespace = %report.namespace,
                resource.name = %report.name,
                "already sealed under active key"
            ),
            ReconcileOutcome::SkippedMissingDependent => info!(
                resource.namespace = %report.namespace,
                resource.name = %report.name,
                "skipped: plaintext Secret not found"
            ),
            ReconcileOutcome::Failed(reason) => {
                metrics::increment_item_failures_total(reason.as_str());
                warn!(
                    resource.namespace = %report.namespace,
                    resource.name = %report.name,
                    attempts = report.attempts,
                    reason = %reason,
                    "failed"
                );
            }
        }

        self.items.push(report);
    }

    /// Close the run
    pub fn finish(
        self,
        key: Option<&KeyMaterial>,
        fatal: Option<RunError>,
        dry_run: bool,
        duration: Duration,
    ) -> RunSummary {
        metrics::set_run_duration(duration.as_secs_f64());
        RunSummary {
            counts: self.counts,
            items: self.items,
            fatal,
            key_id: key.map(|k| k.id.clone()),
            key_fingerprint: key.map(|k| k.fingerprint),
            dry_run,
            duration,
        }
    }
}

/// Final result of a run
#[derive(Debug)]
pub struct RunSummary {
    pub counts: BTreeMap<OutcomeCategory, usize>,
    /// Every finished item, in completion order
    pub items: Vec<ItemReport>,
    /// Condition that aborted the run, if any
    pub fatal: Option<RunError>,
    pub key_id: Option<String>,
    pub key_fingerprint: Option<KeyFingerprint>,
    pub dry_run: bool,
    pub duration: Duration,
}

impl RunSummary {
    pub fn count(&self, category: OutcomeCategory) -> usize {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Outcome recorded for `namespace/name`
    pub fn outcome_of(&self, namespace: &str, name: &str) -> Option<&ReconcileOutcome> {
        self.items
            .iter()
            .find(|item| item.namespace == namespace && item.name == name)
            .map(|item| &item.outcome)
    }

    /// Items that did not end in `updated`
    pub fn not_updated(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|item| item.outcome.category() != OutcomeCategory::Updated)
    }

    /// Worst outcome observed: fatal, then failed or missing dependent, then clean
    pub fn exit_code(&self) -> u8 {
        if self.fatal.is_some() {
            EXIT_FATAL
        } else if self.count(OutcomeCategory::Failed) > 0
            || self.count(OutcomeCategory::MissingDependent) > 0
        {
            EXIT_ITEMS_NOT_CURRENT
        } else {
            EXIT_OK
        }
    }

    /// Human-readable summary table
    ///
    /// `verbose` adds namespace/name and reason for every item that was not
    /// updated.
    pub fn render(&self, verbose: bool) -> String {
        let mut out = String::new();

        let key = match (&self.key_id, &self.key_fingerprint) {
            (Some(id), Some(fp)) => format!("key {id} ({fp})"),
            _ => "no active key".to_string(),
        };
        let _ = writeln!(
            out,
            "Re-sealed {} SealedSecret(s) with {key} in {:.1}s{}",
            self.total(),
            self.duration.as_secs_f64(),
            if self.dry_run { " [dry-run]" } else { "" }
        );

        for category in OutcomeCategory::ALL {
            let _ = writeln!(out, "  {:<28}{:>6}", category.as_str(), self.count(category));
        }

        if let Some(fatal) = &self.fatal {
            let _ = writeln!(out, "Run aborted: {fatal}");
        }

        if verbose {
            let mut not_updated: Vec<_> = self.not_updated().collect();
            if !not_updated.is_empty() {
                not_updated.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
                let _ = writeln!(out, "Not updated:");
                for item in not_updated {
                    let _ = writeln!(out, "  {}/{}  {}", item.namespace, item.name, item.outcome);
                }
            }
        }

        out
    }
}
