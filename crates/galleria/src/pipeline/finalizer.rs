use chrono::Utc;
use tracing::info;

use crate::db::{artifact_repo, gallery_repo, Database, DatabaseError};

/// Links the artifacts a job produced into its gallery.
#[derive(Clone)]
pub struct GalleryFinalizer {
    db: Database,
}

impl GalleryFinalizer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Adds every artifact imported by `job_id` to the gallery's artworks
    /// and stamps the gallery's import time. Existing entries are kept, so
    /// running this twice changes nothing but the timestamps. Returns the
    /// number of newly linked artifacts.
    pub fn finalize(&self, gallery_id: &str, job_id: &str) -> Result<usize, DatabaseError> {
        let artifact_ids: Vec<String> = artifact_repo::find_by_imported_by(&self.db, job_id)?
            .into_iter()
            .map(|a| a.id)
            .collect();

        let added = gallery_repo::add_artworks(&self.db, gallery_id, &artifact_ids, &Utc::now())?;
        info!(
            gallery_id,
            job_id,
            artifacts = artifact_ids.len(),
            added,
            "gallery finalized"
        );
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Artifact, Gallery};

    fn gallery(db: &Database, artworks: &[&str]) {
        let now = Utc::now();
        gallery_repo::insert(
            db,
            &Gallery {
                id: "gallery-1".to_string(),
                name: "Still Life".to_string(),
                course_id: "course-1".to_string(),
                assignment_id: "assignment-1".to_string(),
                course_name: "Art".to_string(),
                assignment_name: "Still Life".to_string(),
                created_by: "instructor-1".to_string(),
                created_at: now,
                updated_at: now,
                last_import_at: None,
                artworks: vec![],
            },
        )
        .unwrap();
        if !artworks.is_empty() {
            let ids: Vec<String> = artworks.iter().map(|s| s.to_string()).collect();
            gallery_repo::add_artworks(db, "gallery-1", &ids, &now).unwrap();
        }
    }

    fn artifact(db: &Database, id: &str, job_id: &str) {
        let now = Utc::now();
        artifact_repo::upsert(
            db,
            &Artifact {
                id: id.to_string(),
                gallery_id: "gallery-1".to_string(),
                title: "t".to_string(),
                images: vec![],
                learner_id: format!("learner-{}", id),
                learner_name: "L".to_string(),
                learner_email: None,
                course_id: "course-1".to_string(),
                assignment_id: "assignment-1".to_string(),
                submitted_at: None,
                late: false,
                imported_by: job_id.to_string(),
                created_at: now,
                updated_at: now,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_finalize_is_additive() {
        let db = Database::open_in_memory().unwrap();
        gallery(&db, &["old-1", "old-2"]);
        artifact(&db, "a1", "job-1");
        artifact(&db, "a2", "job-1");
        artifact(&db, "b1", "job-2");

        let finalizer = GalleryFinalizer::new(db.clone());
        assert_eq!(finalizer.finalize("gallery-1", "job-1").unwrap(), 2);

        let stored = gallery_repo::find_by_id(&db, "gallery-1").unwrap().unwrap();
        assert_eq!(stored.artworks.len(), 4);
        assert_eq!(&stored.artworks[..2], &["old-1".to_string(), "old-2".to_string()]);
        assert!(stored.artworks.contains(&"a1".to_string()));
        assert!(!stored.artworks.contains(&"b1".to_string()));
        assert!(stored.last_import_at.is_some());

        assert_eq!(finalizer.finalize("gallery-1", "job-1").unwrap(), 0);
        let again = gallery_repo::find_by_id(&db, "gallery-1").unwrap().unwrap();
        assert_eq!(again.artworks.len(), 4);
    }

    #[test]
    fn test_finalize_without_artifacts_only_stamps() {
        let db = Database::open_in_memory().unwrap();
        gallery(&db, &[]);
        assert!(gallery_repo::find_by_id(&db, "gallery-1").unwrap().unwrap().last_import_at.is_none());

        let finalizer = GalleryFinalizer::new(db.clone());
        assert_eq!(finalizer.finalize("gallery-1", "job-empty").unwrap(), 0);
        let stored = gallery_repo::find_by_id(&db, "gallery-1").unwrap().unwrap();
        assert!(stored.artworks.is_empty());
        assert!(stored.last_import_at.is_some());
    }
}
