//! External course-management source: submissions, learner profiles and
//! attachment files.
//!
//! [`SubmissionSource`] is the seam the import pipeline consumes.
//! [`ClassroomClient`] talks to the REST API; tests substitute an in-memory
//! implementation.

pub mod client;
pub mod error;
pub mod fetcher;

pub use client::ClassroomClient;
pub use error::SourceError;
pub use fetcher::{
    resolve_assignment_name, resolve_course_name, resolve_learner, LearnerSubmission,
    SubmissionFetcher,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SubmissionState;

/// Reference to a file attached to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub file_id: String,
    /// Title as shown on the submission; may differ from the file name.
    #[serde(default)]
    pub title: Option<String>,
    /// Link back to the file at the source, kept for attribution.
    #[serde(default)]
    pub source_url: Option<String>,
}

/// One learner's submission for an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub learner_id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub late: bool,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Clone, Default)]
pub struct SubmissionPage {
    pub submissions: Vec<Submission>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearnerProfile {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentMetadata {
    pub file_id: String,
    pub name: String,
    pub content_type: Option<String>,
}

/// Read-only access to the course-management system.
#[async_trait]
pub trait SubmissionSource: Send + Sync {
    /// One page of submissions for an assignment, filtered to `states`.
    async fn list_submissions(
        &self,
        course_id: &str,
        assignment_id: &str,
        states: &[SubmissionState],
        page_token: Option<&str>,
    ) -> Result<SubmissionPage, SourceError>;

    async fn get_learner_profile(&self, learner_id: &str) -> Result<LearnerProfile, SourceError>;

    async fn get_attachment_metadata(
        &self,
        file_id: &str,
    ) -> Result<AttachmentMetadata, SourceError>;

    async fn download_attachment(&self, file_id: &str) -> Result<Vec<u8>, SourceError>;

    async fn course_name(&self, course_id: &str) -> Result<String, SourceError>;

    async fn assignment_name(
        &self,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<String, SourceError>;
}
