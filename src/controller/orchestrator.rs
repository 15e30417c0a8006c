//! # Orchestrator
//!
//! Drives one run end to end:
//!
//! 1. Fetch the active key once. Any failure aborts before discovery.
//! 2. Pull the first discovered item. A discovery failure here aborts before
//!    any worker starts.
//! 3. Feed items over a bounded channel to a fixed pool of workers, each
//!    running reconcile-then-apply with the conflict retry loop.
//! 4. Funnel item outcomes to a single reporter task.
//!
//! A fatal condition (later discovery failure, credentials rejected on any
//! item, timeout) cancels the run token. Workers observe it at their next
//! cluster call, dispatch stops, and outcomes already recorded are kept.

use super::applier::{Applied, ApplyError, Applier};
use super::backoff;
use super::budget::ApiBudget;
use super::enumerator::{DiscoveryError, Enumerator};
use super::key_provider::{AmbiguousKeyError, KeyError, KeyFetchError, KeyProvider};
use super::reconciler::{Decision, ItemError, Reconciler};
use super::reporter::{Reporter, RunSummary};
use super::types::{
    EncryptedResourceRef, FailureReason, ItemReport, KeyMaterial, OutcomeCategory,
    ReconcileOutcome,
};
use crate::cluster::{ClusterError, EncryptedResourceStore, KeySource, PlaintextSource};
use crate::config::RunConfig;
use crate::observability::metrics;
use crate::sealing::Sealer;
use futures::StreamExt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

/// Condition that aborts a whole run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to fetch the active key: {0}")]
    KeyFetch(#[source] KeyFetchError),
    #[error(transparent)]
    AmbiguousKey(AmbiguousKeyError),
    #[error("discovery failed: {0}")]
    Discovery(#[source] DiscoveryError),
    #[error("credentials rejected while processing {resource}: {message}")]
    Unauthorized { resource: String, message: String },
    #[error("run exceeded its timeout of {0:?}")]
    TimedOut(Duration),
    #[error("run interrupted")]
    Interrupted,
}

impl From<KeyError> for RunError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Fetch(e) => RunError::KeyFetch(e),
            KeyError::Ambiguous(e) => RunError::AmbiguousKey(e),
        }
    }
}

/// The external collaborators a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn EncryptedResourceStore>,
    pub plaintext: Arc<dyn PlaintextSource>,
    pub keys: Arc<dyn KeySource>,
    pub sealer: Arc<dyn Sealer>,
}

/// First fatal condition of a run; raising it cancels the run
struct FatalSlot {
    error: Mutex<Option<RunError>>,
    cancel: CancellationToken,
}

impl FatalSlot {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            error: Mutex::new(None),
            cancel,
        }
    }

    fn raise(&self, err: RunError) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            error!(error = %err, "fatal condition, cancelling run");
            *slot = Some(err);
        } else {
            debug!(error = %err, "additional fatal condition after cancellation");
        }
        drop(slot);
        self.cancel.cancel();
    }

    /// Record an outside cancellation unless a cause is already known
    fn mark_interrupted(&self) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(RunError::Interrupted);
        }
    }

    fn take(&self) -> Option<RunError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Reconcile-then-apply for one item, with the conflict retry loop
struct ItemPipeline {
    store: Arc<dyn EncryptedResourceStore>,
    reconciler: Reconciler,
    applier: Applier,
    budget: Arc<ApiBudget>,
}

impl ItemPipeline {
    async fn process(
        &self,
        resource: EncryptedResourceRef,
        key: &KeyMaterial,
        fatal: &FatalSlot,
    ) -> ItemReport {
        let started = Instant::now();
        let (namespace, name) = (resource.namespace.clone(), resource.name.clone());

        let (outcome, attempts) = self.run(resource, key).await;
        if let ReconcileOutcome::Failed(FailureReason::Unauthorized(message)) = &outcome {
            fatal.raise(RunError::Unauthorized {
                resource: format!("{namespace}/{name}"),
                message: message.clone(),
            });
        }

        metrics::observe_item_duration(started.elapsed().as_secs_f64());
        ItemReport {
            namespace,
            name,
            outcome,
            attempts,
        }
    }

    async fn run(
        &self,
        resource: EncryptedResourceRef,
        key: &KeyMaterial,
    ) -> (ReconcileOutcome, u32) {
        let policy = self.budget.policy();
        let mut current = resource;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            if attempt > 1 {
                if self.budget.pause(backoff::conflict_pause(policy)).await.is_err() {
                    return (ReconcileOutcome::Failed(FailureReason::Cancelled), attempt - 1);
                }
                match self.refresh(&current).await {
                    Ok(Some(fresh)) => current = fresh,
                    Ok(None) => {
                        return (
                            ReconcileOutcome::Failed(FailureReason::ResourceDeleted),
                            attempt,
                        )
                    }
                    Err(err) => return (failure(err), attempt),
                }
            }

            let decision = match self.reconciler.reconcile(&current, key).await {
                Ok(decision) => decision,
                Err(err) => return (failure(err), attempt),
            };

            let (encrypted_data, expected_version) = match decision {
                Decision::UpToDate => return (ReconcileOutcome::SkippedUpToDate, attempt),
                Decision::MissingDependent => {
                    return (ReconcileOutcome::SkippedMissingDependent, attempt)
                }
                Decision::Reseal {
                    encrypted_data,
                    expected_version,
                } => (encrypted_data, expected_version),
            };

            match self
                .applier
                .apply(&current, &encrypted_data, &expected_version)
                .await
            {
                Ok(Applied::Written { .. }) => {
                    return (ReconcileOutcome::Updated { dry_run: false }, attempt)
                }
                Ok(Applied::Skipped) => {
                    return (ReconcileOutcome::Updated { dry_run: true }, attempt)
                }
                Err(ApplyError::VersionConflict) if attempt >= policy.max_conflict_attempts => {
                    let reason = FailureReason::ConflictExhausted { attempts: attempt };
                    return (ReconcileOutcome::Failed(reason), attempt);
                }
                Err(ApplyError::VersionConflict) => {
                    debug!(
                        attempt,
                        max_attempts = policy.max_conflict_attempts,
                        expected_version = %expected_version,
                        "version conflict, re-reconciling"
                    );
                }
                Err(ApplyError::Cluster(ClusterError::NotFound)) => {
                    return (
                        ReconcileOutcome::Failed(FailureReason::ResourceDeleted),
                        attempt,
                    )
                }
                Err(ApplyError::Cluster(err)) => {
                    return (failure(ItemError::Cluster(err)), attempt)
                }
                Err(ApplyError::Cancelled) => {
                    return (ReconcileOutcome::Failed(FailureReason::Cancelled), attempt)
                }
            }
        }
    }

    /// Re-read the encrypted resource for a fresh version
    async fn refresh(
        &self,
        resource: &EncryptedResourceRef,
    ) -> Result<Option<EncryptedResourceRef>, ItemError> {
        let store = &self.store;
        let (namespace, name) = (resource.namespace.as_str(), resource.name.as_str());
        Ok(self
            .budget
            .call("get", move || store.get(namespace, name))
            .await?)
    }
}

fn failure(err: ItemError) -> ReconcileOutcome {
    let reason = match err {
        ItemError::Encryption(e) => FailureReason::Encryption(e.to_string()),
        ItemError::Cluster(ClusterError::Unauthorized(message)) => {
            FailureReason::Unauthorized(message)
        }
        ItemError::Cluster(e) => FailureReason::Transport(e.to_string()),
        ItemError::ForeignFormat(fields) => FailureReason::ForeignFormat { fields },
        ItemError::Cancelled => FailureReason::Cancelled,
    };
    ReconcileOutcome::Failed(reason)
}

/// Runs the re-encryption pipeline over a scope
///
/// Single use: the cancellation token is spent once [`Orchestrator::run`] returns.
pub struct Orchestrator {
    config: Arc<RunConfig>,
    collaborators: Collaborators,
    budget: Arc<ApiBudget>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: Arc<RunConfig>, collaborators: Collaborators) -> Self {
        let cancel = CancellationToken::new();
        let budget = Arc::new(ApiBudget::new(
            &config.rate_limit,
            config.retry.clone(),
            cancel.clone(),
        ));
        Self {
            config,
            collaborators,
            budget,
            cancel,
        }
    }

    /// Token that aborts the run when cancelled (e.g. on Ctrl-C)
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the run and summarize it
    pub async fn run(&self) -> RunSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "rekey.run",
            run.id = %run_id,
            scope = %self.config.scope.describe(),
            dry_run = self.config.dry_run,
            concurrency = self.config.concurrency,
        );
        self.execute().instrument(span).await
    }

    async fn execute(&self) -> RunSummary {
        let started = Instant::now();
        let fatal = Arc::new(FatalSlot::new(self.cancel.clone()));
        let watchdog = self.spawn_watchdog(&fatal);

        let (key, reporter) = self.dispatch(&fatal).await;

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        if self.cancel.is_cancelled() {
            fatal.mark_interrupted();
        }

        let summary = reporter.finish(
            key.as_deref(),
            fatal.take(),
            self.config.dry_run,
            started.elapsed(),
        );
        info!(
            updated = summary.count(OutcomeCategory::Updated),
            total = summary.total(),
            exit_code = summary.exit_code(),
            duration_ms = u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX),
            "run finished"
        );
        summary
    }

    fn spawn_watchdog(&self, fatal: &Arc<FatalSlot>) -> Option<tokio::task::JoinHandle<()>> {
        let timeout = self.config.timeout?;
        let fatal = Arc::clone(fatal);
        let cancel = self.cancel.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(timeout) => fatal.raise(RunError::TimedOut(timeout)),
            }
        }))
    }

    /// Fetch the key, then stream items through the worker pool
    async fn dispatch(&self, fatal: &Arc<FatalSlot>) -> (Option<Arc<KeyMaterial>>, Reporter) {
        let provider = KeyProvider::new(
            Arc::clone(&self.collaborators.keys),
            Arc::clone(&self.budget),
        );
        let key = match provider.fetch_active_key().await {
            Ok(key) => Arc::new(key),
            Err(KeyError::Fetch(KeyFetchError::Cancelled)) => return (None, Reporter::new()),
            Err(err) => {
                fatal.raise(err.into());
                return (None, Reporter::new());
            }
        };

        let enumerator = Enumerator::new(
            Arc::clone(&self.collaborators.store),
            Arc::clone(&self.budget),
            self.config.page_size,
        );
        let mut items = enumerator.list(self.config.scope.clone());

        let first = match items.next().await {
            None => {
                info!("no SealedSecrets in scope");
                return (Some(key), Reporter::new());
            }
            Some(Err(DiscoveryError::Cancelled)) => return (Some(key), Reporter::new()),
            Some(Err(err)) => {
                fatal.raise(RunError::Discovery(err));
                return (Some(key), Reporter::new());
            }
            Some(Ok(item)) => item,
        };

        let concurrency = self.config.concurrency.max(1);
        let (work_tx, work_rx) = mpsc::channel::<EncryptedResourceRef>(concurrency);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
        let (report_tx, mut report_rx) = mpsc::channel::<ItemReport>(concurrency * 2);

        let reporter_task = tokio::spawn(async move {
            let mut reporter = Reporter::new();
            while let Some(report) = report_rx.recv().await {
                reporter.record(report);
            }
            reporter
        });

        let pipeline = Arc::new(self.pipeline());
        let mut workers = JoinSet::new();
        for worker in 0..concurrency {
            let work_rx = Arc::clone(&work_rx);
            let report_tx = report_tx.clone();
            let pipeline = Arc::clone(&pipeline);
            let key = Arc::clone(&key);
            let fatal = Arc::clone(fatal);
            let cancel = self.cancel.clone();

            workers.spawn(
                async move {
                    loop {
                        let next = tokio::select! {
                            biased;
                            () = cancel.cancelled() => None,
                            next = async { work_rx.lock().await.recv().await } => next,
                        };
                        let Some(resource) = next else { break };
                        if cancel.is_cancelled() {
                            break;
                        }

                        let span = info_span!(
                            "rekey.item",
                            resource.namespace = %resource.namespace,
                            resource.name = %resource.name,
                            resource.version = %resource.resource_version,
                        );
                        let report = pipeline
                            .process(resource, &key, &fatal)
                            .instrument(span)
                            .await;
                        if report_tx.send(report).await.is_err() {
                            break;
                        }
                    }
                    debug!(worker, "worker stopped");
                }
                .in_current_span(),
            );
        }
        drop(report_tx);

        let mut pending = Some(first);
        let mut dispatched = 0usize;
        loop {
            let resource = match pending.take() {
                Some(resource) => resource,
                None => {
                    let next = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        next = items.next() => next,
                    };
                    match next {
                        None => break,
                        Some(Ok(resource)) => resource,
                        Some(Err(DiscoveryError::Cancelled)) => break,
                        Some(Err(err)) => {
                            fatal.raise(RunError::Discovery(err));
                            break;
                        }
                    }
                }
            };

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                sent = work_tx.send(resource) => {
                    if sent.is_err() {
                        break;
                    }
                    dispatched += 1;
                }
            }
        }
        drop(work_tx);
        debug!(dispatched, "dispatch finished");

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "worker task failed");
            }
        }

        let reporter = match reporter_task.await {
            Ok(reporter) => reporter,
            Err(err) => {
                error!(error = %err, "reporter task failed");
                Reporter::new()
            }
        };

        (Some(key), reporter)
    }

    fn pipeline(&self) -> ItemPipeline {
        ItemPipeline {
            store: Arc::clone(&self.collaborators.store),
            reconciler: Reconciler::new(
                Arc::clone(&self.collaborators.plaintext),
                Arc::clone(&self.collaborators.sealer),
                Arc::clone(&self.budget),
                self.config.reseal_foreign,
            ),
            applier: Applier::new(
                Arc::clone(&self.collaborators.store),
                Arc::clone(&self.budget),
                self.config.dry_run,
            ),
            budget: Arc::clone(&self.budget),
        }
    }
}
