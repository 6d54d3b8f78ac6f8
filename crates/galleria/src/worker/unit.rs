use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MediaKind;
use crate::error::ImportError;

/// A downloaded attachment waiting in staging storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedAttachment {
    pub file_id: String,
    pub display_name: String,
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub staging_path: String,
}

/// The dispatched task payload: one learner's submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionWorkUnit {
    pub job_id: String,
    pub gallery_id: String,
    pub course_id: String,
    pub assignment_id: String,
    pub learner_id: String,
    pub learner_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learner_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub late: bool,
    pub attachments: Vec<StagedAttachment>,
    /// Artifact to update instead of deriving a new id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_artifact_id: Option<String>,
}

impl SubmissionWorkUnit {
    /// Key under which this unit resolves within its job.
    pub fn unit_key(&self) -> &str {
        &self.learner_id
    }

    /// `existing_artifact_id`, or a UUIDv5 of job id and learner id. Either
    /// way every delivery of the unit targets the same artifact.
    pub fn artifact_id(&self) -> String {
        match &self.existing_artifact_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => derive_artifact_id(&self.job_id, &self.learner_id),
        }
    }

    pub fn staging_paths(&self) -> impl Iterator<Item = &str> {
        self.attachments.iter().map(|a| a.staging_path.as_str())
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, ImportError> {
        serde_json::to_vec(self)
            .map_err(|e| ImportError::InvalidInput(format!("unserializable work unit: {}", e)))
    }

    /// Parses a task payload. Anything but a well-formed unit is rejected.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ImportError> {
        let unit: Self = serde_json::from_slice(payload)
            .map_err(|e| ImportError::InvalidInput(format!("malformed work unit payload: {}", e)))?;

        if unit.job_id.is_empty() || unit.learner_id.is_empty() || unit.gallery_id.is_empty() {
            return Err(ImportError::InvalidInput(
                "work unit is missing jobId, galleryId or learnerId".to_string(),
            ));
        }
        Ok(unit)
    }
}

pub fn derive_artifact_id(job_id: &str, learner_id: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", job_id, learner_id).as_bytes(),
    )
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_unit() -> SubmissionWorkUnit {
        SubmissionWorkUnit {
            job_id: "job-1".to_string(),
            gallery_id: "gallery-1".to_string(),
            course_id: "course-1".to_string(),
            assignment_id: "assignment-1".to_string(),
            learner_id: "learner-1".to_string(),
            learner_name: "Ada".to_string(),
            learner_email: None,
            submitted_at: None,
            late: false,
            attachments: vec![StagedAttachment {
                file_id: "f1".to_string(),
                display_name: "sketch.png".to_string(),
                kind: MediaKind::Image,
                source_url: None,
                staging_path: "staging/job-1/learner-1/0-sketch.png".to_string(),
            }],
            existing_artifact_id: None,
        }
    }

    #[test]
    fn test_artifact_id_is_deterministic() {
        let unit = sample_unit();
        assert_eq!(unit.artifact_id(), unit.artifact_id());
        assert_eq!(unit.artifact_id(), derive_artifact_id("job-1", "learner-1"));
        assert_ne!(unit.artifact_id(), derive_artifact_id("job-2", "learner-1"));
    }

    #[test]
    fn test_existing_artifact_id_wins() {
        let mut unit = sample_unit();
        unit.existing_artifact_id = Some("art-7".to_string());
        assert_eq!(unit.artifact_id(), "art-7");

        unit.existing_artifact_id = Some(String::new());
        assert_eq!(unit.artifact_id(), derive_artifact_id("job-1", "learner-1"));
    }

    #[test]
    fn test_payload_uses_camel_case() {
        let payload = sample_unit().to_payload().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["attachments"][0]["stagingPath"], "staging/job-1/learner-1/0-sketch.png");
        assert_eq!(json["attachments"][0]["kind"], "image");
        assert!(json.get("existingArtifactId").is_none());

        assert_eq!(SubmissionWorkUnit::from_payload(&payload).unwrap(), sample_unit());
    }

    #[test]
    fn test_malformed_payload_rejected() {
        assert!(matches!(
            SubmissionWorkUnit::from_payload(b"{not json"),
            Err(ImportError::InvalidInput(_))
        ));

        let mut unit = sample_unit();
        unit.learner_id.clear();
        let payload = serde_json::to_vec(&unit).unwrap();
        assert!(matches!(
            SubmissionWorkUnit::from_payload(&payload),
            Err(ImportError::InvalidInput(_))
        ));
    }
}
