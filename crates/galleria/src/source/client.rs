//! REST client for the course-management API and its file store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{
    AttachmentMetadata, AttachmentRef, LearnerProfile, SourceError, Submission, SubmissionPage,
    SubmissionSource,
};
use crate::config::{SourceConfig, SubmissionState};
use crate::sanitize::redact_url;
use crate::secrets::SecretRef;

/// Maximum length of an error body kept in [`SourceError::Api`].
const MAX_ERROR_BODY_LENGTH: usize = 200;

fn truncate_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

pub struct ClassroomClient {
    client: Client,
    base_url: String,
    drive_base_url: String,
    token: SecretString,
    page_size: u32,
}

impl ClassroomClient {
    /// Builds a client from configuration, resolving the access token.
    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        let token = SecretRef::new(
            config.access_token_insecure.as_deref(),
            config.access_token_file.as_deref(),
            config.access_token_env_var.as_deref(),
        )
        .resolve()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("galleria/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_client(
            client,
            &config.base_url,
            &config.drive_base_url,
            token,
            config.page_size,
        ))
    }

    /// Creates a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: Client,
        base_url: &str,
        drive_base_url: &str,
        token: SecretString,
        page_size: u32,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            drive_base_url: drive_base_url.trim_end_matches('/').to_string(),
            token,
            page_size,
        }
    }

    fn submissions_url(&self, course_id: &str, assignment_id: &str) -> String {
        format!(
            "{}/courses/{}/courseWork/{}/studentSubmissions",
            self.base_url, course_id, assignment_id
        )
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.drive_base_url, file_id)
    }

    async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, SourceError> {
        tracing::debug!(url = %redact_url(url), "source request");
        let response = self
            .client
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await?;
        Self::ensure_success(response, url).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let response = self.get(url, query).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode(e.to_string()))
    }

    async fn ensure_success(
        response: reqwest::Response,
        url: &str,
    ) -> Result<reqwest::Response, SourceError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(redact_url(url)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl SubmissionSource for ClassroomClient {
    async fn list_submissions(
        &self,
        course_id: &str,
        assignment_id: &str,
        states: &[SubmissionState],
        page_token: Option<&str>,
    ) -> Result<SubmissionPage, SourceError> {
        let mut query: Vec<(&str, String)> = states
            .iter()
            .map(|s| ("states", s.as_str().to_string()))
            .collect();
        query.push(("pageSize", self.page_size.to_string()));
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let url = self.submissions_url(course_id, assignment_id);
        let response: ListSubmissionsResponse = self.get_json(&url, &query).await?;
        Ok(response.into_page())
    }

    async fn get_learner_profile(&self, learner_id: &str) -> Result<LearnerProfile, SourceError> {
        let url = format!("{}/userProfiles/{}", self.base_url, learner_id);
        let profile: WireUserProfile = self.get_json(&url, &[]).await?;
        Ok(profile.into_profile(learner_id))
    }

    async fn get_attachment_metadata(
        &self,
        file_id: &str,
    ) -> Result<AttachmentMetadata, SourceError> {
        let query = [("fields", "id,name,mimeType".to_string())];
        let file: WireDriveFileMetadata = self.get_json(&self.file_url(file_id), &query).await?;
        Ok(AttachmentMetadata {
            file_id: file.id,
            name: file.name,
            content_type: file.mime_type,
        })
    }

    async fn download_attachment(&self, file_id: &str) -> Result<Vec<u8>, SourceError> {
        let query = [("alt", "media".to_string())];
        let response = self.get(&self.file_url(file_id), &query).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn course_name(&self, course_id: &str) -> Result<String, SourceError> {
        let url = format!("{}/courses/{}", self.base_url, course_id);
        let course: WireCourse = self.get_json(&url, &[]).await?;
        course
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| SourceError::Decode(format!("course {} has no name", course_id)))
    }

    async fn assignment_name(
        &self,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<String, SourceError> {
        let url = format!(
            "{}/courses/{}/courseWork/{}",
            self.base_url, course_id, assignment_id
        );
        let work: WireCourseWork = self.get_json(&url, &[]).await?;
        work.title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SourceError::Decode(format!("assignment {} has no title", assignment_id)))
    }
}

// ---- wire format ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSubmissionsResponse {
    #[serde(default)]
    student_submissions: Vec<WireSubmission>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl ListSubmissionsResponse {
    fn into_page(self) -> SubmissionPage {
        SubmissionPage {
            submissions: self
                .student_submissions
                .into_iter()
                .map(WireSubmission::into_submission)
                .collect(),
            next_page_token: self.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSubmission {
    id: String,
    user_id: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    late: bool,
    #[serde(default)]
    update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    creation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    assignment_submission: Option<WireAssignmentSubmission>,
}

impl WireSubmission {
    fn into_submission(self) -> Submission {
        let attachments = self
            .assignment_submission
            .map(|s| s.attachments)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| a.drive_file)
            .map(|f| AttachmentRef {
                file_id: f.id,
                title: f.title,
                source_url: f.alternate_link,
            })
            .collect();

        Submission {
            id: self.id,
            learner_id: self.user_id,
            state: self.state,
            late: self.late,
            submitted_at: self.update_time.or(self.creation_time),
            attachments,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireAssignmentSubmission {
    #[serde(default)]
    attachments: Vec<WireAttachment>,
}

/// Attachments other than files (links, videos, forms) carry no
/// `driveFile` and are dropped.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAttachment {
    #[serde(default)]
    drive_file: Option<WireDriveFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDriveFile {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    alternate_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUserProfile {
    #[serde(default)]
    name: Option<WireName>,
    #[serde(default)]
    email_address: Option<String>,
}

impl WireUserProfile {
    fn into_profile(self, learner_id: &str) -> LearnerProfile {
        let name = self
            .name
            .and_then(|n| n.full_name)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| learner_id.to_string());
        LearnerProfile {
            id: learner_id.to_string(),
            name,
            email: self.email_address.filter(|e| !e.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireName {
    #[serde(default)]
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDriveFileMetadata {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCourse {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCourseWork {
    #[serde(default)]
    title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClassroomClient {
        ClassroomClient::with_client(
            Client::new(),
            "https://classroom.example.com/v1/",
            "https://drive.example.com/v3",
            SecretString::from("token".to_string()),
            50,
        )
    }

    #[test]
    fn test_urls() {
        let client = client();
        assert_eq!(
            client.submissions_url("c1", "a1"),
            "https://classroom.example.com/v1/courses/c1/courseWork/a1/studentSubmissions"
        );
        assert_eq!(client.file_url("f1"), "https://drive.example.com/v3/files/f1");
    }

    #[test]
    fn test_parse_submission_page() {
        let body = r#"{
            "studentSubmissions": [
                {
                    "id": "s1",
                    "userId": "u1",
                    "state": "TURNED_IN",
                    "late": true,
                    "updateTime": "2026-03-01T10:00:00Z",
                    "assignmentSubmission": {
                        "attachments": [
                            {"driveFile": {"id": "f1", "title": "sketch.png", "alternateLink": "https://drive/f1"}},
                            {"link": {"url": "https://example.com"}}
                        ]
                    }
                },
                {"id": "s2", "userId": "u2"}
            ],
            "nextPageToken": ""
        }"#;

        let response: ListSubmissionsResponse = serde_json::from_str(body).unwrap();
        let page = response.into_page();
        assert!(page.next_page_token.is_none());
        assert_eq!(page.submissions.len(), 2);

        let first = &page.submissions[0];
        assert_eq!(first.learner_id, "u1");
        assert!(first.late);
        assert!(first.submitted_at.is_some());
        assert_eq!(first.attachments.len(), 1);
        assert_eq!(first.attachments[0].file_id, "f1");
        assert_eq!(first.attachments[0].source_url.as_deref(), Some("https://drive/f1"));

        assert!(page.submissions[1].attachments.is_empty());
    }

    #[test]
    fn test_profile_falls_back_to_id() {
        let profile: WireUserProfile = serde_json::from_str(r#"{"name": {"fullName": " "}}"#).unwrap();
        let profile = profile.into_profile("u1");
        assert_eq!(profile.name, "u1");
        assert!(profile.email.is_none());

        let profile: WireUserProfile = serde_json::from_str(
            r#"{"name": {"fullName": "Ada Lovelace"}, "emailAddress": "ada@example.com"}"#,
        )
        .unwrap();
        let profile = profile.into_profile("u1");
        assert_eq!(profile.name, "Ada Lovelace");
        assert_eq!(profile.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_truncate_body() {
        let long = "é".repeat(300);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("(truncated)"));
        assert_eq!(truncate_body("short"), "short");
    }
}
