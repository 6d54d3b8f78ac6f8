use std::sync::Arc;

use tracing::{error, warn};

use crate::error::ImportError;
use crate::pipeline::{CheckOutcome, CompletionTracker};
use crate::queue::{Delivery, TaskHandler};
use crate::worker::{ConversionWorker, SubmissionWorkUnit, UnitOutcome};

/// Receiving end for dispatched work units: parse, convert, then let the
/// tracker decide whether the job is done.
pub struct TaskEndpoint {
    worker: ConversionWorker,
    tracker: Arc<CompletionTracker>,
}

impl TaskEndpoint {
    pub fn new(worker: ConversionWorker, tracker: Arc<CompletionTracker>) -> Self {
        Self { worker, tracker }
    }

    /// Processes one unit and checks job completion afterwards, whatever
    /// the outcome.
    pub fn handle(&self, unit: &SubmissionWorkUnit) -> Result<UnitOutcome, ImportError> {
        let result = self.worker.process(unit);
        self.tracker.check(&unit.job_id);
        result
    }

    /// Processes a unit without the completion check, for callers that run
    /// a batch and check once at the end.
    pub fn process_only(&self, unit: &SubmissionWorkUnit) -> Result<UnitOutcome, ImportError> {
        self.worker.process(unit)
    }

    /// Resolves a unit as failed without a completion check.
    pub fn fail_only(&self, unit: &SubmissionWorkUnit, reason: &str) -> Result<bool, ImportError> {
        self.worker.fail_unit(unit, reason)
    }

    pub fn check_completion(&self, job_id: &str) -> CheckOutcome {
        self.tracker.check(job_id)
    }

    /// Entry point for raw queue payloads. A payload that does not parse is
    /// rejected with [`ImportError::InvalidInput`].
    pub fn handle_payload(&self, payload: &[u8]) -> Result<UnitOutcome, ImportError> {
        let unit = SubmissionWorkUnit::from_payload(payload)?;
        self.handle(&unit)
    }

    /// Resolves a unit as failed once the queue gives up on it, so the job
    /// can still complete.
    pub fn exhausted(&self, unit: &SubmissionWorkUnit, last_error: &str) {
        let reason = format!("delivery attempts exhausted: {}", last_error);
        match self.worker.fail_unit(unit, &reason) {
            Ok(true) => warn!(job_id = %unit.job_id, "unit failed after exhausting deliveries"),
            Ok(false) => {}
            Err(e) => error!(job_id = %unit.job_id, error = %e, "could not record exhausted unit"),
        }
        self.tracker.check(&unit.job_id);
    }
}

impl TaskHandler for TaskEndpoint {
    fn handle(&self, payload: &[u8]) -> Delivery {
        match self.handle_payload(payload) {
            Ok(_) => Delivery::Done,
            Err(ImportError::InvalidInput(reason)) => {
                warn!(reason = %reason, "rejecting malformed task payload");
                Delivery::Reject(reason)
            }
            Err(e) => Delivery::Retry(e.to_string()),
        }
    }

    fn on_exhausted(&self, payload: &[u8], last_error: &str) {
        match SubmissionWorkUnit::from_payload(payload) {
            Ok(unit) => self.exhausted(&unit, last_error),
            Err(e) => error!(error = %e, "exhausted payload is not a work unit"),
        }
    }
}
