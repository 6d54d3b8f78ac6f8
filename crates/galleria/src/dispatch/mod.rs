//! Hands work units to the conversion worker, either in-process or through a
//! task queue. The orchestrator only sees the [`Dispatcher`] trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::db::job_repo::{self, NewErrorMarker};
use crate::db::Database;
use crate::error::ImportError;
use crate::queue::TaskQueue;
use crate::sanitize::{hash_key, redact_path};
use crate::storage::ObjectStore;
use crate::worker::{SubmissionWorkUnit, TaskEndpoint};

/// What happened to a batch of work units at dispatch time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Units enqueued, or run to an outcome inline.
    pub dispatched: usize,
    /// Units that could not be dispatched and were resolved as failed.
    pub failed: usize,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Dispatches every unit of one job. Per-unit failures are recorded on
    /// the job, counted in the report and never stop the remaining units.
    async fn dispatch(&self, units: Vec<SubmissionWorkUnit>) -> DispatchReport;
}

/// Runs every unit in-process, one after the other, then checks completion
/// once for the batch.
pub struct InlineDispatcher {
    endpoint: Arc<TaskEndpoint>,
}

impl InlineDispatcher {
    pub fn new(endpoint: Arc<TaskEndpoint>) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Dispatcher for InlineDispatcher {
    async fn dispatch(&self, units: Vec<SubmissionWorkUnit>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Some(job_id) = units.first().map(|u| u.job_id.clone()) else {
            return report;
        };

        for unit in units {
            let endpoint = Arc::clone(&self.endpoint);
            let joined = tokio::task::spawn_blocking(move || {
                let result = endpoint.process_only(&unit);
                if let Err(e) = &result {
                    // Inline runs get no redelivery.
                    warn!(error = %e, "inline unit failed, resolving as failed");
                    endpoint.fail_only(&unit, &e.to_string())?;
                }
                Ok::<_, ImportError>(result.ok())
            })
            .await;

            match joined {
                Ok(Ok(Some(_))) => report.dispatched += 1,
                Ok(Ok(None)) => report.failed += 1,
                Ok(Err(e)) => {
                    error!(error = %e, "could not record failed inline unit");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "inline conversion task aborted");
                    report.failed += 1;
                }
            }
        }

        let endpoint = Arc::clone(&self.endpoint);
        let outcome = tokio::task::spawn_blocking(move || endpoint.check_completion(&job_id))
            .await
            .ok();
        debug!(?outcome, "inline batch completion check");

        report
    }
}

/// Enqueues every unit as an independent task, staggering delivery times.
/// An enqueue failure resolves that unit as failed and the loop continues.
pub struct QueuedDispatcher {
    queue: Arc<dyn TaskQueue>,
    db: Database,
    store: Arc<dyn ObjectStore>,
    stagger: Duration,
}

impl QueuedDispatcher {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        db: Database,
        store: Arc<dyn ObjectStore>,
        stagger: Duration,
    ) -> Self {
        Self {
            queue,
            db,
            store,
            stagger,
        }
    }

    async fn enqueue_unit(
        &self,
        unit: &SubmissionWorkUnit,
        offset: Duration,
    ) -> Result<String, ImportError> {
        let payload = unit.to_payload()?;
        let not_before = Utc::now()
            + chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(self.queue.enqueue(payload, not_before).await?)
    }

    fn resolve_undispatched(&self, unit: &SubmissionWorkUnit, reason: &str) -> Result<(), ImportError> {
        let markers: Vec<NewErrorMarker> = unit
            .staging_paths()
            .map(|path| NewErrorMarker::new(path, format!("dispatch failed: {}", reason)))
            .collect();
        job_repo::record_unit_failed(&self.db, &unit.job_id, unit.unit_key(), &markers, &Utc::now())?;

        for path in unit.staging_paths() {
            if let Err(e) = self.store.delete(path) {
                warn!(file = %redact_path(path), error = %e, "failed to delete staged attachment");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for QueuedDispatcher {
    async fn dispatch(&self, units: Vec<SubmissionWorkUnit>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (index, unit) in units.iter().enumerate() {
            let offset = self.stagger * index as u32;
            match self.enqueue_unit(unit, offset).await {
                Ok(task) => {
                    debug!(task = %task, learner = %hash_key(&unit.learner_id), "unit enqueued");
                    report.dispatched += 1;
                }
                Err(e) => {
                    warn!(learner = %hash_key(&unit.learner_id), error = %e, "enqueue failed");
                    if let Err(record) = self.resolve_undispatched(unit, &e.to_string()) {
                        error!(
                            learner = %hash_key(&unit.learner_id),
                            error = %record,
                            "could not record undispatched unit"
                        );
                    }
                    report.failed += 1;
                }
            }
        }

        info!(
            dispatched = report.dispatched,
            failed = report.failed,
            "work units enqueued"
        );
        report
    }
}
