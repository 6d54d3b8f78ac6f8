//! Artifact repository: one row per learner submission in a gallery.

use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{Artifact, DisplayImage};

struct ArtifactRow {
    id: String,
    gallery_id: String,
    title: String,
    images: String,
    learner_id: String,
    learner_name: String,
    learner_email: Option<String>,
    course_id: String,
    assignment_id: String,
    submitted_at: Option<String>,
    late: bool,
    imported_by: String,
    created_at: String,
    updated_at: String,
}

impl ArtifactRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            gallery_id: row.get("gallery_id")?,
            title: row.get("title")?,
            images: row.get("images")?,
            learner_id: row.get("learner_id")?,
            learner_name: row.get("learner_name")?,
            learner_email: row.get("learner_email")?,
            course_id: row.get("course_id")?,
            assignment_id: row.get("assignment_id")?,
            submitted_at: row.get("submitted_at")?,
            late: row.get("late")?,
            imported_by: row.get("imported_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_artifact(self) -> Result<Artifact, DatabaseError> {
        let images: Vec<DisplayImage> = serde_json::from_str(&self.images)?;
        Ok(Artifact {
            images,
            submitted_at: parse_optional_timestamp(self.submitted_at)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            gallery_id: self.gallery_id,
            title: self.title,
            learner_id: self.learner_id,
            learner_name: self.learner_name,
            learner_email: self.learner_email,
            course_id: self.course_id,
            assignment_id: self.assignment_id,
            late: self.late,
            imported_by: self.imported_by,
        })
    }
}

/// Inserts the artifact, or replaces the pipeline-owned columns of an
/// existing row with the same id. `created_at` and the engagement counters
/// of an existing row are preserved.
pub fn upsert(db: &Database, artifact: &Artifact) -> Result<(), DatabaseError> {
    let images = serde_json::to_string(&artifact.images)?;
    let submitted_at = artifact.submitted_at.as_ref().map(format_timestamp);
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO artifacts (id, gallery_id, title, images, learner_id, learner_name,
             learner_email, course_id, assignment_id, submitted_at, late, imported_by,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                gallery_id = excluded.gallery_id,
                title = excluded.title,
                images = excluded.images,
                learner_id = excluded.learner_id,
                learner_name = excluded.learner_name,
                learner_email = excluded.learner_email,
                course_id = excluded.course_id,
                assignment_id = excluded.assignment_id,
                submitted_at = excluded.submitted_at,
                late = excluded.late,
                imported_by = excluded.imported_by,
                updated_at = excluded.updated_at",
            params![
                artifact.id,
                artifact.gallery_id,
                artifact.title,
                images,
                artifact.learner_id,
                artifact.learner_name,
                artifact.learner_email,
                artifact.course_id,
                artifact.assignment_id,
                submitted_at,
                artifact.late,
                artifact.imported_by,
                format_timestamp(&artifact.created_at),
                format_timestamp(&artifact.updated_at),
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Artifact>, DatabaseError> {
    let row = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM artifacts WHERE id = ?1",
                params![id],
                ArtifactRow::from_row,
            )
            .optional()?)
    })?;
    row.map(ArtifactRow::into_artifact).transpose()
}

/// All artifacts produced by one import job, oldest first.
pub fn find_by_imported_by(db: &Database, job_id: &str) -> Result<Vec<Artifact>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM artifacts WHERE imported_by = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![job_id], ArtifactRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(ArtifactRow::into_artifact).collect()
}

/// Id of the artifact a learner already has in the gallery, if any.
pub fn find_id_for_learner(
    db: &Database,
    gallery_id: &str,
    learner_id: &str,
) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT id FROM artifacts WHERE gallery_id = ?1 AND learner_id = ?2
                 ORDER BY created_at LIMIT 1",
                params![gallery_id, learner_id],
                |r| r.get(0),
            )
            .optional()?)
    })
}

pub fn count_by_imported_by(db: &Database, job_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM artifacts WHERE imported_by = ?1",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
