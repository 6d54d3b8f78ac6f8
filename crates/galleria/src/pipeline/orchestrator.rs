//! Top-level import driver: job creation, submission fetch, staging and
//! dispatch.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use super::tracker::{CompletionTracker, DISPATCHED_PROGRESS};
use crate::config::{MediaKind, SubmissionState};
use crate::db::job_repo::{self, NewErrorMarker, NewJob};
use crate::db::{artifact_repo, gallery_repo, Database};
use crate::dispatch::Dispatcher;
use crate::error::ImportError;
use crate::model::{Gallery, JobStatusView};
use crate::sanitize::{hash_key, redact_path};
use crate::source::{
    resolve_assignment_name, resolve_course_name, resolve_learner, AttachmentRef,
    LearnerSubmission, SubmissionFetcher, SubmissionSource,
};
use crate::storage::{staging_path, ObjectStore};
use crate::worker::{StagedAttachment, SubmissionWorkUnit};

/// Progress once the number of work units is known.
pub const TOTALS_PROGRESS: u8 = 5;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// What staging one learner's submission amounted to.
enum StagedLearner {
    /// Work unit ready for dispatch.
    Ready(SubmissionWorkUnit),
    /// Supported attachments exist but none could be downloaded.
    Undeliverable,
    /// Nothing importable.
    Skipped,
}

/// Parameters of one import run.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRequest {
    pub gallery_id: String,
    pub course_id: String,
    pub assignment_id: String,
    /// Identity of the user starting the import.
    pub initiator: String,
}

impl ImportRequest {
    pub fn new(
        gallery_id: impl Into<String>,
        course_id: impl Into<String>,
        assignment_id: impl Into<String>,
        initiator: impl Into<String>,
    ) -> Self {
        Self {
            gallery_id: gallery_id.into(),
            course_id: course_id.into(),
            assignment_id: assignment_id.into(),
            initiator: initiator.into(),
        }
    }

    fn validate(&self) -> Result<(), ImportError> {
        let missing: Vec<&str> = [
            ("gallery", &self.gallery_id),
            ("course", &self.course_id),
            ("assignment", &self.assignment_id),
            ("initiator", &self.initiator),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ImportError::InvalidInput(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )))
        }
    }
}

/// Decides whether an initiator may import into a course.
pub trait ImportPolicy: Send + Sync {
    fn may_import(&self, initiator: &str, course_id: &str) -> bool;
}

/// Policy for deployments where authorization happens upstream.
pub struct AllowAll;

impl ImportPolicy for AllowAll {
    fn may_import(&self, _initiator: &str, _course_id: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Extra submission states to request on top of the required ones.
    pub submission_states: Vec<SubmissionState>,
    pub staging_prefix: String,
}

pub struct ImportOrchestrator {
    db: Database,
    store: Arc<dyn ObjectStore>,
    source: Arc<dyn SubmissionSource>,
    dispatcher: Arc<dyn Dispatcher>,
    tracker: Arc<CompletionTracker>,
    policy: Arc<dyn ImportPolicy>,
    settings: OrchestratorSettings,
}

impl ImportOrchestrator {
    pub fn new(
        db: Database,
        store: Arc<dyn ObjectStore>,
        source: Arc<dyn SubmissionSource>,
        dispatcher: Arc<dyn Dispatcher>,
        settings: OrchestratorSettings,
    ) -> Self {
        let tracker = Arc::new(CompletionTracker::new(db.clone()));
        Self {
            db,
            store,
            source,
            dispatcher,
            tracker,
            policy: Arc::new(AllowAll),
            settings,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn ImportPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Runs an import through dispatch and returns the job id. Conversion
    /// may still be in flight when this returns; poll [`job_status`].
    ///
    /// [`job_status`]: Self::job_status
    pub async fn start_import(&self, request: &ImportRequest) -> Result<String, ImportError> {
        let job_id = self.create_job(request)?;
        self.run(&job_id, request).await?;
        Ok(job_id)
    }

    /// Creates the job and runs the import on a background task, returning
    /// the job id immediately. Fatal failures end up on the job record.
    pub fn spawn_import(
        self: &Arc<Self>,
        request: ImportRequest,
    ) -> Result<(String, tokio::task::JoinHandle<()>), ImportError> {
        let job_id = self.create_job(&request)?;
        let orchestrator = Arc::clone(self);
        let background_id = job_id.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = orchestrator.run(&background_id, &request).await {
                error!(error = %e, "background import failed");
            }
        });
        Ok((job_id, handle))
    }

    pub fn job_status(&self, job_id: &str) -> Result<JobStatusView, ImportError> {
        let job = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| ImportError::NotFound(format!("import job {}", job_id)))?;
        let markers = job_repo::error_markers(&self.db, job_id)?;
        Ok(JobStatusView::new(job, markers))
    }

    /// Validates the request and writes the job in `pending`.
    fn create_job(&self, request: &ImportRequest) -> Result<String, ImportError> {
        request.validate()?;
        if !self.policy.may_import(&request.initiator, &request.course_id) {
            return Err(ImportError::Forbidden(format!(
                "user may not import into course {}",
                request.course_id
            )));
        }

        let job_id = Uuid::new_v4().to_string();
        job_repo::insert(
            &self.db,
            &NewJob {
                id: &job_id,
                gallery_id: &request.gallery_id,
                course_id: &request.course_id,
                assignment_id: &request.assignment_id,
                created_by: &request.initiator,
            },
            &Utc::now(),
        )?;
        info!(job_id = %job_id, gallery_id = %request.gallery_id, "import job created");
        Ok(job_id)
    }

    /// Drives a created job. Any error escaping the run marks the job
    /// `error` and is returned as [`ImportError::JobFatal`].
    async fn run(&self, job_id: &str, request: &ImportRequest) -> Result<(), ImportError> {
        let span = tracing::info_span!(
            "import",
            job_id,
            course_id = %request.course_id,
            assignment_id = %request.assignment_id
        );

        match self.execute(job_id, request).instrument(span).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let message = e.to_string();
                error!(job_id, error = %message, "import failed");
                if let Err(mark) = job_repo::mark_error(&self.db, job_id, &message, &Utc::now()) {
                    error!(job_id, error = %mark, "could not mark job as failed");
                }
                Err(ImportError::JobFatal {
                    job_id: job_id.to_string(),
                    message,
                })
            }
        }
    }

    async fn execute(&self, job_id: &str, request: &ImportRequest) -> Result<(), ImportError> {
        self.ensure_gallery(request).await?;
        job_repo::mark_processing(&self.db, job_id, &Utc::now())?;

        let fetcher = SubmissionFetcher::new(self.source.as_ref(), &self.settings.submission_states);
        let groups = fetcher
            .fetch_grouped(&request.course_id, &request.assignment_id)
            .await?;
        info!(learners = groups.len(), "submissions fetched");

        let mut units = Vec::with_capacity(groups.len());
        let mut undeliverable = 0u32;
        for group in groups {
            match self.stage_learner(job_id, request, group).await {
                StagedLearner::Ready(unit) => units.push(unit),
                StagedLearner::Undeliverable => undeliverable += 1,
                StagedLearner::Skipped => {}
            }
        }

        let total = units.len() as u32 + undeliverable;
        if let Err(e) = job_repo::set_totals(&self.db, job_id, total, TOTALS_PROGRESS, &Utc::now()) {
            // Nothing is dispatched yet; without totals the job could never complete.
            self.discard_staged(&units);
            return Err(e.into());
        }
        info!(units = units.len(), undeliverable, "work units staged");

        let report = self.dispatcher.dispatch(units).await;
        info!(
            dispatched = report.dispatched,
            failed = report.failed,
            "dispatch finished"
        );

        if let Err(e) = job_repo::advance_progress(&self.db, job_id, DISPATCHED_PROGRESS, &Utc::now()) {
            warn!(error = %e, "could not record dispatch checkpoint");
        }
        // Covers jobs with nothing left in flight: no units, or every
        // unit resolved during dispatch.
        self.tracker.check(job_id);
        Ok(())
    }

    fn discard_staged(&self, units: &[SubmissionWorkUnit]) {
        for path in units.iter().flat_map(|u| u.staging_paths()) {
            if let Err(e) = self.store.delete(path) {
                warn!(file = %redact_path(path), error = %e, "failed to delete staged attachment");
            }
        }
    }

    /// Creates the gallery if it does not exist yet. Name lookups fall back
    /// to placeholders.
    async fn ensure_gallery(&self, request: &ImportRequest) -> Result<(), ImportError> {
        if gallery_repo::exists(&self.db, &request.gallery_id)? {
            return Ok(());
        }

        let course_name = resolve_course_name(self.source.as_ref(), &request.course_id).await;
        let assignment_name =
            resolve_assignment_name(self.source.as_ref(), &request.course_id, &request.assignment_id)
                .await;
        let now = Utc::now();
        let gallery = Gallery {
            id: request.gallery_id.clone(),
            name: assignment_name.clone(),
            course_id: request.course_id.clone(),
            assignment_id: request.assignment_id.clone(),
            course_name,
            assignment_name,
            created_by: request.initiator.clone(),
            created_at: now,
            updated_at: now,
            last_import_at: None,
            artworks: vec![],
        };

        if let Err(e) = gallery_repo::insert(&self.db, &gallery) {
            // A concurrent import may have created it first.
            if gallery_repo::exists(&self.db, &request.gallery_id)? {
                return Ok(());
            }
            return Err(e.into());
        }
        info!(gallery_id = %gallery.id, "gallery created");
        Ok(())
    }

    /// Downloads one learner's supported attachments into staging and
    /// builds the work unit. Failures here are recorded, never raised.
    ///
    /// A learner whose supported attachments all fail to download still
    /// counts as a unit; it is resolved as failed on the spot.
    async fn stage_learner(
        &self,
        job_id: &str,
        request: &ImportRequest,
        group: LearnerSubmission,
    ) -> StagedLearner {
        let learner = resolve_learner(self.source.as_ref(), &group.learner_id).await;
        let mut staged = Vec::new();
        let mut download_failures = Vec::new();

        for (index, attachment) in group.attachments.iter().enumerate() {
            let (name, content_type, kind) = self.classify(attachment).await;
            let Some(kind) = kind else {
                info!(
                    file_id = %attachment.file_id,
                    content_type = content_type.as_deref().unwrap_or("unknown"),
                    "skipping unsupported attachment"
                );
                continue;
            };

            let path = staging_path(
                &self.settings.staging_prefix,
                job_id,
                &group.learner_id,
                index,
                &name,
            );
            match self
                .download(&attachment.file_id, &path, content_type.as_deref())
                .await
            {
                Ok(()) => staged.push(StagedAttachment {
                    file_id: attachment.file_id.clone(),
                    display_name: name,
                    kind,
                    source_url: attachment.source_url.clone(),
                    staging_path: path,
                }),
                Err(e) => {
                    warn!(
                        file_id = %attachment.file_id,
                        file = %redact_path(&path),
                        error = %e,
                        "attachment download failed"
                    );
                    download_failures.push(NewErrorMarker::new(
                        format!("download:{}", attachment.file_id),
                        e.to_string(),
                    ));
                }
            }
        }

        if staged.is_empty() {
            if download_failures.is_empty() {
                return StagedLearner::Skipped;
            }
            let recorded = job_repo::record_unit_failed(
                &self.db,
                job_id,
                &group.learner_id,
                &download_failures,
                &Utc::now(),
            );
            if let Err(e) = recorded {
                error!(learner = %hash_key(&group.learner_id), error = %e, "could not record undeliverable submission");
            }
            warn!(learner = %hash_key(&group.learner_id), "no attachment could be downloaded");
            return StagedLearner::Undeliverable;
        }

        for marker in &download_failures {
            if let Err(e) = job_repo::record_file_error(&self.db, job_id, marker, &Utc::now()) {
                error!(error = %e, "could not record download failure");
            }
        }

        let existing_artifact_id =
            match artifact_repo::find_id_for_learner(&self.db, &request.gallery_id, &group.learner_id) {
                Ok(found) => found,
                Err(e) => {
                    warn!(learner = %hash_key(&group.learner_id), error = %e, "existing artifact lookup failed");
                    None
                }
            };

        StagedLearner::Ready(SubmissionWorkUnit {
            job_id: job_id.to_string(),
            gallery_id: request.gallery_id.clone(),
            course_id: request.course_id.clone(),
            assignment_id: request.assignment_id.clone(),
            learner_id: group.learner_id,
            learner_name: learner.name,
            learner_email: learner.email,
            submitted_at: group.submitted_at,
            late: group.late,
            attachments: staged,
            existing_artifact_id,
        })
    }

    /// Display name, declared content type and accepted kind of an
    /// attachment. Falls back to the attachment title when metadata is
    /// unavailable.
    async fn classify(&self, attachment: &AttachmentRef) -> (String, Option<String>, Option<MediaKind>) {
        match self.source.get_attachment_metadata(&attachment.file_id).await {
            Ok(metadata) => {
                let kind = MediaKind::resolve(metadata.content_type.as_deref(), &metadata.name);
                (metadata.name, metadata.content_type, kind)
            }
            Err(e) => {
                warn!(file_id = %attachment.file_id, error = %e, "metadata lookup failed, using title");
                let name = attachment
                    .title
                    .clone()
                    .unwrap_or_else(|| attachment.file_id.clone());
                let kind = MediaKind::resolve(None, &name);
                (name, None, kind)
            }
        }
    }

    async fn download(
        &self,
        file_id: &str,
        path: &str,
        content_type: Option<&str>,
    ) -> Result<(), ImportError> {
        let bytes = self.source.download_attachment(file_id).await?;
        self.store
            .put(path, &bytes, content_type.unwrap_or(FALLBACK_CONTENT_TYPE))?;
        Ok(())
    }
}
