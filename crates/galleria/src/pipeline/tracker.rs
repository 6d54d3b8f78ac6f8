use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::finalizer::GalleryFinalizer;
use crate::db::{job_repo, Database, DatabaseError};
use crate::model::ImportJob;

/// Progress at which dispatch is done and unit resolution takes over.
pub const DISPATCHED_PROGRESS: u8 = 10;
/// Highest progress reported before the job completes.
pub const MAX_RUNNING_PROGRESS: u8 = 95;
const FINALIZE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// This call moved the job to `completed` and ran the finalizer.
    Completed { linked: usize },
    /// Units are still outstanding; progress is at the given value.
    Running { progress: u8 },
    /// The job was already `completed` or `error`.
    AlreadyTerminal,
    NotFound,
    /// The check itself failed and was logged.
    Failed,
}

/// Checks whether a job has resolved every work unit and, if so, completes
/// it and finalizes its gallery. Safe to call concurrently and repeatedly:
/// only the caller whose conditional update flips the status finalizes.
#[derive(Clone)]
pub struct CompletionTracker {
    db: Database,
    finalizer: GalleryFinalizer,
}

impl CompletionTracker {
    pub fn new(db: Database) -> Self {
        let finalizer = GalleryFinalizer::new(db.clone());
        Self { db, finalizer }
    }

    /// Never fails: problems are logged and reported as
    /// [`CheckOutcome::Failed`], since the caller has already resolved its
    /// own unit.
    pub fn check(&self, job_id: &str) -> CheckOutcome {
        let _span = tracing::info_span!("completion_check", job_id).entered();
        match self.try_check(job_id) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "completion check failed");
                CheckOutcome::Failed
            }
        }
    }

    fn try_check(&self, job_id: &str) -> Result<CheckOutcome, DatabaseError> {
        let Some(job) = job_repo::find_by_id(&self.db, job_id)? else {
            warn!("job not found");
            return Ok(CheckOutcome::NotFound);
        };
        if job.status.is_terminal() {
            debug!(status = %job.status, "job already terminal");
            return Ok(CheckOutcome::AlreadyTerminal);
        }

        let now = Utc::now();
        if job_repo::try_complete(&self.db, job_id, &now)? {
            info!(
                processed = job.processed_units,
                failed = job.failed_units,
                total = job.total_submission_units,
                "import job completed"
            );
            let linked = self.finalize_with_retry(&job);
            return Ok(CheckOutcome::Completed { linked });
        }

        let progress = running_progress(&job);
        if job_repo::advance_progress(&self.db, job_id, progress, &now)? {
            debug!(progress, "progress advanced");
        }
        Ok(CheckOutcome::Running {
            progress: progress.max(job.progress),
        })
    }

    fn finalize_with_retry(&self, job: &ImportJob) -> usize {
        for attempt in 1..=FINALIZE_ATTEMPTS {
            match self.finalizer.finalize(&job.gallery_id, &job.id) {
                Ok(linked) => return linked,
                Err(e) if attempt < FINALIZE_ATTEMPTS => {
                    warn!(attempt, error = %e, "gallery finalization failed, retrying");
                }
                Err(e) => {
                    error!(error = %e, "gallery finalization failed, artworks not linked");
                }
            }
        }
        0
    }
}

/// Maps resolved units onto the 10..=95 band.
fn running_progress(job: &ImportJob) -> u8 {
    if !job.totals_known || job.total_submission_units == 0 {
        return job.progress;
    }
    let ratio = job.resolved_units().min(job.total_submission_units) as u64;
    let span = (MAX_RUNNING_PROGRESS - DISPATCHED_PROGRESS) as u64;
    let progress = DISPATCHED_PROGRESS as u64 + ratio * span / job.total_submission_units as u64;
    (progress as u8).min(MAX_RUNNING_PROGRESS)
}
