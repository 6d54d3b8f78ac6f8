//! Submission enumeration, grouping and best-effort metadata lookups.

use chrono::{DateTime, Utc};

use super::{AttachmentRef, LearnerProfile, SourceError, Submission, SubmissionSource};
use crate::config::SubmissionState;
use crate::sanitize::hash_key;

/// States always requested, whatever the configuration lists.
pub const REQUIRED_STATES: [SubmissionState; 4] = [
    SubmissionState::Returned,
    SubmissionState::TurnedIn,
    SubmissionState::ReclaimedByStudent,
    SubmissionState::Created,
];

/// Upper bound on pages per listing, against a source that keeps returning
/// a next-page token.
const MAX_PAGES: usize = 10_000;

/// All attachments one learner submitted for the assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct LearnerSubmission {
    pub learner_id: String,
    pub late: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub attachments: Vec<AttachmentRef>,
}

pub struct SubmissionFetcher<'a> {
    source: &'a dyn SubmissionSource,
    states: Vec<SubmissionState>,
}

impl<'a> SubmissionFetcher<'a> {
    /// `states` is widened to include [`REQUIRED_STATES`].
    pub fn new(source: &'a dyn SubmissionSource, states: &[SubmissionState]) -> Self {
        let mut merged: Vec<SubmissionState> = REQUIRED_STATES.to_vec();
        for state in states {
            if !merged.contains(state) {
                merged.push(*state);
            }
        }
        Self {
            source,
            states: merged,
        }
    }

    pub fn states(&self) -> &[SubmissionState] {
        &self.states
    }

    /// Pages through every submission for the assignment.
    pub async fn fetch_all(
        &self,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<Submission>, SourceError> {
        let mut submissions = Vec::new();
        let mut page_token: Option<String> = None;

        for page_number in 1..=MAX_PAGES {
            let page = self
                .source
                .list_submissions(course_id, assignment_id, &self.states, page_token.as_deref())
                .await?;
            tracing::debug!(
                page = page_number,
                count = page.submissions.len(),
                "fetched submission page"
            );
            submissions.extend(page.submissions);

            match page.next_page_token {
                Some(next) if Some(&next) != page_token.as_ref() => page_token = Some(next),
                Some(_) => {
                    return Err(SourceError::Decode(
                        "source repeated the same page token".to_string(),
                    ))
                }
                None => return Ok(submissions),
            }
        }

        Err(SourceError::TooManyPages(MAX_PAGES))
    }

    /// Enumerates submissions and groups them by learner.
    pub async fn fetch_grouped(
        &self,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<LearnerSubmission>, SourceError> {
        let submissions = self.fetch_all(course_id, assignment_id).await?;
        Ok(group_by_learner(submissions))
    }
}

/// Groups submissions by learner, in first-seen order. Learners without any
/// attachment are dropped. A learner with several submissions gets their
/// attachments concatenated, is late if any submission was, and keeps the
/// newest submission time.
pub fn group_by_learner(submissions: Vec<Submission>) -> Vec<LearnerSubmission> {
    let mut groups: Vec<LearnerSubmission> = Vec::new();

    for submission in submissions {
        if submission.attachments.is_empty() {
            continue;
        }
        match groups
            .iter_mut()
            .find(|g| g.learner_id == submission.learner_id)
        {
            Some(group) => {
                group.late |= submission.late;
                group.submitted_at = group.submitted_at.max(submission.submitted_at);
                for attachment in submission.attachments {
                    if !group.attachments.iter().any(|a| a.file_id == attachment.file_id) {
                        group.attachments.push(attachment);
                    }
                }
            }
            None => groups.push(LearnerSubmission {
                learner_id: submission.learner_id,
                late: submission.late,
                submitted_at: submission.submitted_at,
                attachments: submission.attachments,
            }),
        }
    }

    groups
}

/// Learner profile, or a profile named after the raw id if the lookup fails.
pub async fn resolve_learner(source: &dyn SubmissionSource, learner_id: &str) -> LearnerProfile {
    match source.get_learner_profile(learner_id).await {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!(learner = %hash_key(learner_id), error = %e, "learner lookup failed, using id");
            LearnerProfile {
                id: learner_id.to_string(),
                name: learner_id.to_string(),
                email: None,
            }
        }
    }
}

pub async fn resolve_course_name(source: &dyn SubmissionSource, course_id: &str) -> String {
    match source.course_name(course_id).await {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(course_id, error = %e, "course name lookup failed, using placeholder");
            format!("Course {}", course_id)
        }
    }
}

pub async fn resolve_assignment_name(
    source: &dyn SubmissionSource,
    course_id: &str,
    assignment_id: &str,
) -> String {
    match source.assignment_name(course_id, assignment_id).await {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(assignment_id, error = %e, "assignment name lookup failed, using placeholder");
            format!("Assignment {}", assignment_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AttachmentMetadata, SubmissionPage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn submission(id: &str, learner: &str, files: &[&str], late: bool) -> Submission {
        Submission {
            id: id.to_string(),
            learner_id: learner.to_string(),
            state: Some("TURNED_IN".to_string()),
            late,
            submitted_at: None,
            attachments: files
                .iter()
                .map(|f| AttachmentRef {
                    file_id: f.to_string(),
                    title: None,
                    source_url: None,
                })
                .collect(),
        }
    }

    /// Serves fixed pages and records the tokens it was asked for.
    struct PagedSource {
        pages: Vec<SubmissionPage>,
        requested: Mutex<Vec<Option<String>>>,
        fail_lookups: bool,
    }

    #[async_trait]
    impl SubmissionSource for PagedSource {
        async fn list_submissions(
            &self,
            _course_id: &str,
            _assignment_id: &str,
            states: &[SubmissionState],
            page_token: Option<&str>,
        ) -> Result<SubmissionPage, SourceError> {
            assert!(states.contains(&SubmissionState::TurnedIn));
            self.requested
                .lock()
                .unwrap()
                .push(page_token.map(String::from));
            let index = page_token.map(|t| t.parse::<usize>().unwrap()).unwrap_or(0);
            Ok(self.pages[index].clone())
        }

        async fn get_learner_profile(&self, learner_id: &str) -> Result<LearnerProfile, SourceError> {
            if self.fail_lookups {
                return Err(SourceError::NotFound(learner_id.to_string()));
            }
            Ok(LearnerProfile {
                id: learner_id.to_string(),
                name: "Ada".to_string(),
                email: Some("ada@example.com".to_string()),
            })
        }

        async fn get_attachment_metadata(
            &self,
            file_id: &str,
        ) -> Result<AttachmentMetadata, SourceError> {
            Err(SourceError::NotFound(file_id.to_string()))
        }

        async fn download_attachment(&self, file_id: &str) -> Result<Vec<u8>, SourceError> {
            Err(SourceError::NotFound(file_id.to_string()))
        }

        async fn course_name(&self, course_id: &str) -> Result<String, SourceError> {
            if self.fail_lookups {
                return Err(SourceError::Api {
                    status: 500,
                    body: String::new(),
                });
            }
            Ok(format!("Art {}", course_id))
        }

        async fn assignment_name(
            &self,
            _course_id: &str,
            assignment_id: &str,
        ) -> Result<String, SourceError> {
            if self.fail_lookups {
                return Err(SourceError::NotFound(assignment_id.to_string()));
            }
            Ok("Still Life".to_string())
        }
    }

    fn paged(pages: Vec<SubmissionPage>, fail_lookups: bool) -> PagedSource {
        PagedSource {
            pages,
            requested: Mutex::new(vec![]),
            fail_lookups,
        }
    }

    #[tokio::test]
    async fn test_fetch_all_pages_until_exhausted() {
        let source = paged(
            vec![
                SubmissionPage {
                    submissions: vec![submission("s1", "u1", &["f1"], false)],
                    next_page_token: Some("1".to_string()),
                },
                SubmissionPage {
                    submissions: vec![submission("s2", "u2", &["f2"], false)],
                    next_page_token: Some("2".to_string()),
                },
                SubmissionPage {
                    submissions: vec![submission("s3", "u3", &[], false)],
                    next_page_token: None,
                },
            ],
            false,
        );

        let fetcher = SubmissionFetcher::new(&source, &[]);
        let all = fetcher.fetch_all("c", "a").await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(
            *source.requested.lock().unwrap(),
            vec![None, Some("1".to_string()), Some("2".to_string())]
        );

        let grouped = fetcher.fetch_grouped("c", "a").await.unwrap();
        assert_eq!(grouped.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_rejects_repeated_token() {
        let source = paged(
            vec![
                SubmissionPage {
                    submissions: vec![],
                    next_page_token: Some("1".to_string()),
                },
                SubmissionPage {
                    submissions: vec![],
                    next_page_token: Some("1".to_string()),
                },
            ],
            false,
        );
        let fetcher = SubmissionFetcher::new(&source, &[]);
        assert!(matches!(
            fetcher.fetch_all("c", "a").await,
            Err(SourceError::Decode(_))
        ));
    }

    #[test]
    fn test_required_states_always_included() {
        let source = paged(vec![], false);
        let fetcher = SubmissionFetcher::new(&source, &[SubmissionState::New]);
        for state in REQUIRED_STATES {
            assert!(fetcher.states().contains(&state));
        }
        assert!(fetcher.states().contains(&SubmissionState::New));
        assert_eq!(fetcher.states().len(), 5);
    }

    #[test]
    fn test_group_by_learner_merges_and_drops_empty() {
        let grouped = group_by_learner(vec![
            submission("s1", "u1", &["f1"], false),
            submission("s2", "u2", &[], true),
            submission("s3", "u1", &["f1", "f2"], true),
            submission("s4", "u3", &["f3"], false),
        ]);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].learner_id, "u1");
        assert!(grouped[0].late);
        let files: Vec<&str> = grouped[0]
            .attachments
            .iter()
            .map(|a| a.file_id.as_str())
            .collect();
        assert_eq!(files, vec!["f1", "f2"]);
        assert_eq!(grouped[1].learner_id, "u3");
    }

    #[tokio::test]
    async fn test_resolve_helpers_fall_back() {
        let failing = paged(vec![], true);
        let learner = resolve_learner(&failing, "u42").await;
        assert_eq!(learner.name, "u42");
        assert!(learner.email.is_none());
        assert_eq!(resolve_course_name(&failing, "c1").await, "Course c1");
        assert_eq!(
            resolve_assignment_name(&failing, "c1", "a1").await,
            "Assignment a1"
        );

        let working = paged(vec![], false);
        assert_eq!(resolve_learner(&working, "u42").await.name, "Ada");
        assert_eq!(resolve_course_name(&working, "c1").await, "Art c1");
        assert_eq!(resolve_assignment_name(&working, "c1", "a1").await, "Still Life");
    }
}
