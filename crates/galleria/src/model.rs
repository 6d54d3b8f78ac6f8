//! Persisted domain records: import jobs, artifacts, galleries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an [`ImportJob`]. `Completed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn parse(s: &str, job_id: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "error" => Self::Error,
            other => {
                log::warn!(
                    "Unknown job status '{}' for job {}, treating as error",
                    other,
                    job_id
                );
                Self::Error
            }
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One import run against one gallery.
///
/// `total_submission_units` counts dispatched work units (one per learner),
/// never raw files.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportJob {
    pub id: String,
    pub gallery_id: String,
    pub course_id: String,
    pub assignment_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub total_submission_units: u32,
    /// Set once the orchestrator has counted the work units.
    pub totals_known: bool,
    pub processed_units: u32,
    pub failed_units: u32,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ImportJob {
    /// Units that reached a final outcome, successful or not.
    pub fn resolved_units(&self) -> u32 {
        self.processed_units + self.failed_units
    }
}

/// Granularity of an entry in a job's error list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorLevel {
    /// A single attachment failed; its unit may still have succeeded.
    File,
    /// The whole unit produced no image.
    Unit,
}

impl ErrorLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Unit => "unit",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "unit" => Self::Unit,
            _ => Self::File,
        }
    }
}

/// An entry of the job's `errorFiles` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMarker {
    pub marker: String,
    pub level: ErrorLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Polling view returned to UI and CLI callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(rename = "processedFiles")]
    pub processed_units: u32,
    #[serde(rename = "totalFiles")]
    pub total_submission_units: u32,
    pub failed_units: u32,
    pub error_files: Vec<ErrorMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatusView {
    pub fn new(job: ImportJob, error_files: Vec<ErrorMarker>) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            processed_units: job.processed_units,
            total_submission_units: job.total_submission_units,
            failed_units: job.failed_units,
            error_files,
            error_message: job.error_message,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

/// A normalized, viewable image belonging to an [`Artifact`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayImage {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Page within the source document; 1 for plain images.
    pub page_number: u32,
    pub width: u32,
    pub height: u32,
}

/// Gallery entry created for one learner submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    pub gallery_id: String,
    pub title: String,
    pub images: Vec<DisplayImage>,
    pub learner_id: String,
    pub learner_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learner_email: Option<String>,
    pub course_id: String,
    pub assignment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    pub late: bool,
    /// Id of the import job that produced this artifact.
    pub imported_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gallery {
    pub id: String,
    pub name: String,
    pub course_id: String,
    pub assignment_id: String,
    pub course_name: String,
    pub assignment_name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_import_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub artworks: Vec<String>,
}
