#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use galleria::config::SubmissionState;
use galleria::source::{
    AttachmentMetadata, AttachmentRef, LearnerProfile, Submission, SubmissionPage,
};
use galleria::{SourceError, SubmissionSource};

/// One attachment served by [`FakeSource`].
#[derive(Debug, Clone)]
pub struct FakeFile {
    pub id: String,
    pub name: String,
    pub content_type: Option<String>,
    /// `None` makes the download fail.
    pub bytes: Option<Vec<u8>>,
}

impl FakeFile {
    pub fn new(id: &str, name: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            content_type: Some(content_type.to_string()),
            bytes: Some(bytes),
        }
    }

    pub fn broken(id: &str, name: &str, content_type: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            content_type: Some(content_type.to_string()),
            bytes: None,
        }
    }
}

/// In-memory course with one submission per learner.
#[derive(Default)]
pub struct FakeSource {
    submissions: Vec<Submission>,
    profiles: HashMap<String, LearnerProfile>,
    files: HashMap<String, FakeFile>,
    downloads: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_submission(mut self, learner_id: &str, files: Vec<FakeFile>) -> Self {
        let attachments = files
            .iter()
            .map(|f| AttachmentRef {
                file_id: f.id.clone(),
                title: Some(f.name.clone()),
                source_url: Some(format!("https://drive.example.com/{}", f.id)),
            })
            .collect();
        self.submissions.push(Submission {
            id: format!("sub-{}", learner_id),
            learner_id: learner_id.to_string(),
            state: Some("TURNED_IN".to_string()),
            late: false,
            submitted_at: None,
            attachments,
        });
        self.profiles.insert(
            learner_id.to_string(),
            LearnerProfile {
                id: learner_id.to_string(),
                name: format!("Learner {}", learner_id),
                email: Some(format!("{}@school.example.com", learner_id)),
            },
        );
        for file in files {
            self.files.insert(file.id.clone(), file);
        }
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn file(&self, file_id: &str) -> Result<&FakeFile, SourceError> {
        self.files
            .get(file_id)
            .ok_or_else(|| SourceError::NotFound(file_id.to_string()))
    }
}

#[async_trait]
impl SubmissionSource for FakeSource {
    async fn list_submissions(
        &self,
        _course_id: &str,
        _assignment_id: &str,
        _states: &[SubmissionState],
        _page_token: Option<&str>,
    ) -> Result<SubmissionPage, SourceError> {
        Ok(SubmissionPage {
            submissions: self.submissions.clone(),
            next_page_token: None,
        })
    }

    async fn get_learner_profile(&self, learner_id: &str) -> Result<LearnerProfile, SourceError> {
        self.profiles
            .get(learner_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(learner_id.to_string()))
    }

    async fn get_attachment_metadata(
        &self,
        file_id: &str,
    ) -> Result<AttachmentMetadata, SourceError> {
        let file = self.file(file_id)?;
        Ok(AttachmentMetadata {
            file_id: file.id.clone(),
            name: file.name.clone(),
            content_type: file.content_type.clone(),
        })
    }

    async fn download_attachment(&self, file_id: &str) -> Result<Vec<u8>, SourceError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.file(file_id)?.bytes.clone().ok_or_else(|| SourceError::Api {
            status: 500,
            body: format!("download of {} failed", file_id),
        })
    }

    async fn course_name(&self, _course_id: &str) -> Result<String, SourceError> {
        Ok("Studio Art".to_string())
    }

    async fn assignment_name(
        &self,
        _course_id: &str,
        _assignment_id: &str,
    ) -> Result<String, SourceError> {
        Ok("Self Portrait".to_string())
    }
}
