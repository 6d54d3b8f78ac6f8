use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::db::job_repo::{self, NewErrorMarker};
use crate::db::{artifact_repo, Database};
use crate::error::{ImportError, StorageError};
use crate::model::{Artifact, DisplayImage};
use crate::processor::ConverterRegistry;
use crate::sanitize::{hash_key, redact_path};
use crate::storage::{artwork_path, ObjectStore};
use crate::worker::{StagedAttachment, SubmissionWorkUnit};

const JPEG: &str = "image/jpeg";

/// What a single delivery of a work unit amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    /// An artifact was written. `failed_files` lists the staging paths of
    /// attachments that did not convert.
    Processed {
        artifact_id: String,
        images: usize,
        failed_files: Vec<String>,
    },
    /// No attachment converted; the unit counts as failed.
    Failed { failed_files: Vec<String> },
    /// An earlier delivery already resolved this unit.
    AlreadyResolved,
}

/// Converts the staged attachments of one learner into an artifact.
///
/// Attachment failures are contained: the unit resolves as processed if at
/// least one image was produced, as failed otherwise. An `Err` means the
/// unit was not resolved at all (store or database unavailable): staged
/// files are kept and the delivery should be retried.
pub struct ConversionWorker {
    db: Database,
    store: Arc<dyn ObjectStore>,
    registry: Arc<ConverterRegistry>,
    artwork_prefix: String,
}

impl ConversionWorker {
    pub fn new(
        db: Database,
        store: Arc<dyn ObjectStore>,
        registry: Arc<ConverterRegistry>,
        artwork_prefix: impl Into<String>,
    ) -> Self {
        Self {
            db,
            store,
            registry,
            artwork_prefix: artwork_prefix.into(),
        }
    }

    pub fn process(&self, unit: &SubmissionWorkUnit) -> Result<UnitOutcome, ImportError> {
        let _span = tracing::info_span!(
            "work_unit",
            job_id = %unit.job_id,
            learner = %hash_key(&unit.learner_id),
            attachments = unit.attachments.len()
        )
        .entered();

        if job_repo::is_unit_resolved(&self.db, &unit.job_id, unit.unit_key())? {
            info!("unit already resolved, discarding redelivery");
            self.discard_staged(unit);
            return Ok(UnitOutcome::AlreadyResolved);
        }

        let artifact_id = unit.artifact_id();
        let mut images: Vec<DisplayImage> = Vec::new();
        let mut failures: Vec<NewErrorMarker> = Vec::new();

        for (index, attachment) in unit.attachments.iter().enumerate() {
            match self.convert_attachment(&artifact_id, index, attachment) {
                Ok(mut converted) => images.append(&mut converted),
                Err(e) if is_attachment_failure(&e) => {
                    warn!(
                        file = %redact_path(&attachment.staging_path),
                        kind = ?attachment.kind,
                        error = %e,
                        "attachment conversion failed"
                    );
                    failures.push(NewErrorMarker::new(&attachment.staging_path, e.to_string()));
                }
                Err(e) => {
                    // Staged files stay in place for the next delivery.
                    warn!(error = %e, "object store unavailable, unit left unresolved");
                    return Err(e);
                }
            }
        }

        let now = Utc::now();
        let failed_files: Vec<String> = failures.iter().map(|f| f.marker.clone()).collect();

        let outcome = if images.is_empty() {
            let resolved =
                job_repo::record_unit_failed(&self.db, &unit.job_id, unit.unit_key(), &failures, &now)?;
            warn!(failed = failures.len(), "no attachment converted, unit failed");
            if resolved {
                UnitOutcome::Failed { failed_files }
            } else {
                UnitOutcome::AlreadyResolved
            }
        } else {
            let count = images.len();
            let kept: HashSet<String> = images.iter().map(|i| i.id.clone()).collect();
            let previous = artifact_repo::find_by_id(&self.db, &artifact_id)?;
            artifact_repo::upsert(&self.db, &build_artifact(unit, &artifact_id, images, now))?;
            if let Some(previous) = previous {
                self.prune_images(&artifact_id, &previous.images, &kept);
            }
            let resolved = job_repo::record_unit_processed(
                &self.db,
                &unit.job_id,
                unit.unit_key(),
                &artifact_id,
                &failures,
                &now,
            )?;
            info!(images = count, failed = failures.len(), "artifact written");
            if resolved {
                UnitOutcome::Processed {
                    artifact_id,
                    images: count,
                    failed_files,
                }
            } else {
                UnitOutcome::AlreadyResolved
            }
        };

        self.discard_staged(unit);
        Ok(outcome)
    }

    /// Resolves a unit whose deliveries were all exhausted without an
    /// outcome. Every staged attachment becomes a unit-level marker.
    pub fn fail_unit(&self, unit: &SubmissionWorkUnit, reason: &str) -> Result<bool, ImportError> {
        let markers: Vec<NewErrorMarker> = unit
            .staging_paths()
            .map(|path| NewErrorMarker::new(path, reason))
            .collect();
        let resolved =
            job_repo::record_unit_failed(&self.db, &unit.job_id, unit.unit_key(), &markers, &Utc::now())?;
        self.discard_staged(unit);
        Ok(resolved)
    }

    fn convert_attachment(
        &self,
        artifact_id: &str,
        index: usize,
        attachment: &StagedAttachment,
    ) -> Result<Vec<DisplayImage>, ImportError> {
        let bytes = self.store.get(&attachment.staging_path)?;
        let pages = self.registry.convert(attachment.kind, &bytes)?;
        debug!(pages = pages.len(), "attachment converted");

        let mut images = Vec::with_capacity(pages.len());
        for page in pages {
            let image_id = format!("{}-{}", index, page.page_number);

            let path = artwork_path(&self.artwork_prefix, artifact_id, &image_id, false);
            self.store.put(&path, &page.image.bytes, JPEG)?;

            let thumbnail_url = match &page.thumbnail {
                Some(thumb) => {
                    let thumb_path = artwork_path(&self.artwork_prefix, artifact_id, &image_id, true);
                    self.store.put(&thumb_path, &thumb.bytes, JPEG)?;
                    Some(self.store.public_url(&thumb_path))
                }
                None => None,
            };

            images.push(DisplayImage {
                id: image_id,
                url: self.store.public_url(&path),
                thumbnail_url,
                page_number: page.page_number,
                width: page.image.width,
                height: page.image.height,
            });
        }
        Ok(images)
    }

    /// Deletes the published objects of images an earlier import wrote
    /// under this artifact id and the current one no longer produces.
    fn prune_images(&self, artifact_id: &str, previous: &[DisplayImage], kept: &HashSet<String>) {
        for image in previous.iter().filter(|i| !kept.contains(&i.id)) {
            for thumbnail in [false, true] {
                let path = artwork_path(&self.artwork_prefix, artifact_id, &image.id, thumbnail);
                if let Err(e) = self.store.delete(&path) {
                    warn!(path = %path, error = %e, "failed to delete stale artwork image");
                }
            }
            debug!(image = %image.id, "stale artwork image removed");
        }
    }

    fn discard_staged(&self, unit: &SubmissionWorkUnit) {
        for path in unit.staging_paths() {
            if let Err(e) = self.store.delete(path) {
                warn!(file = %redact_path(path), error = %e, "failed to delete staged attachment");
            }
        }
    }
}

/// Failures confined to one attachment: it cannot be decoded, or its staged
/// bytes are gone. Any other store error affects the whole unit.
fn is_attachment_failure(error: &ImportError) -> bool {
    matches!(
        error,
        ImportError::Conversion(_) | ImportError::Storage(StorageError::NotFound(_))
    )
}

fn build_artifact(
    unit: &SubmissionWorkUnit,
    artifact_id: &str,
    images: Vec<DisplayImage>,
    now: chrono::DateTime<Utc>,
) -> Artifact {
    Artifact {
        id: artifact_id.to_string(),
        gallery_id: unit.gallery_id.clone(),
        title: format!("{}'s submission", unit.learner_name),
        images,
        learner_id: unit.learner_id.clone(),
        learner_name: unit.learner_name.clone(),
        learner_email: unit.learner_email.clone(),
        course_id: unit.course_id.clone(),
        assignment_id: unit.assignment_id.clone(),
        submitted_at: unit.submitted_at,
        late: unit.late,
        imported_by: unit.job_id.clone(),
        created_at: now,
        updated_at: now,
    }
}
