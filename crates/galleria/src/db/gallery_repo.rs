//! Gallery repository: galleries and their `artworks` set.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::Gallery;

struct GalleryRow {
    id: String,
    name: String,
    course_id: String,
    assignment_id: String,
    course_name: String,
    assignment_name: String,
    created_by: String,
    created_at: String,
    updated_at: String,
    last_import_at: Option<String>,
}

impl GalleryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            course_id: row.get("course_id")?,
            assignment_id: row.get("assignment_id")?,
            course_name: row.get("course_name")?,
            assignment_name: row.get("assignment_name")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            last_import_at: row.get("last_import_at")?,
        })
    }

    fn into_gallery(self, artworks: Vec<String>) -> Result<Gallery, DatabaseError> {
        Ok(Gallery {
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            last_import_at: parse_optional_timestamp(self.last_import_at)?,
            id: self.id,
            name: self.name,
            course_id: self.course_id,
            assignment_id: self.assignment_id,
            course_name: self.course_name,
            assignment_name: self.assignment_name,
            created_by: self.created_by,
            artworks,
        })
    }
}

/// Inserts a gallery. Its `artworks` are ignored; use [`add_artworks`].
pub fn insert(db: &Database, gallery: &Gallery) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO galleries (id, name, course_id, assignment_id, course_name,
             assignment_name, created_by, created_at, updated_at, last_import_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                gallery.id,
                gallery.name,
                gallery.course_id,
                gallery.assignment_id,
                gallery.course_name,
                gallery.assignment_name,
                gallery.created_by,
                format_timestamp(&gallery.created_at),
                format_timestamp(&gallery.updated_at),
                gallery.last_import_at.as_ref().map(format_timestamp),
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Gallery>, DatabaseError> {
    let found = db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM galleries WHERE id = ?1",
                params![id],
                GalleryRow::from_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut stmt = conn.prepare(
            "SELECT artifact_id FROM gallery_artworks WHERE gallery_id = ?1 ORDER BY position",
        )?;
        let artworks = stmt
            .query_map(params![id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some((row, artworks)))
    })?;
    found
        .map(|(row, artworks)| row.into_gallery(artworks))
        .transpose()
}

pub fn exists(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM galleries WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Unions `artifact_ids` into the gallery's `artworks` set and stamps
/// `updated_at`/`last_import_at`, in one transaction. Ids already present are
/// left where they are. Returns the number of ids newly added.
pub fn add_artworks(
    db: &Database,
    gallery_id: &str,
    artifact_ids: &[String],
    now: &DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let now = format_timestamp(now);
    db.with_transaction(|tx| {
        let next_position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM gallery_artworks WHERE gallery_id = ?1",
            params![gallery_id],
            |r| r.get(0),
        )?;

        let mut added = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO gallery_artworks (gallery_id, artifact_id, position, added_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for artifact_id in artifact_ids {
                let position = next_position + added as i64;
                added += stmt.execute(params![gallery_id, artifact_id, position, now])?;
            }
        }

        let stamped = tx.execute(
            "UPDATE galleries SET updated_at = ?2, last_import_at = ?2 WHERE id = ?1",
            params![gallery_id, now],
        )?;
        if stamped == 0 {
            log::warn!("Gallery {} not found while adding artworks", gallery_id);
        }

        Ok(added)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_gallery(id: &str) -> Gallery {
        let created = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Gallery {
            id: id.to_string(),
            name: "Still Life".to_string(),
            course_id: "course-1".to_string(),
            assignment_id: "assignment-1".to_string(),
            course_name: "Art 101".to_string(),
            assignment_name: "Still Life".to_string(),
            created_by: "instructor-1".to_string(),
            created_at: created,
            updated_at: created,
            last_import_at: None,
            artworks: vec![],
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_find_exists() {
        let db = Database::open_in_memory().unwrap();
        assert!(!exists(&db, "g1").unwrap());
        insert(&db, &sample_gallery("g1")).unwrap();
        assert!(exists(&db, "g1").unwrap());

        let gallery = find_by_id(&db, "g1").unwrap().unwrap();
        assert_eq!(gallery.course_name, "Art 101");
        assert!(gallery.artworks.is_empty());
        assert!(gallery.last_import_at.is_none());
    }

    #[test]
    fn test_add_artworks_is_additive() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &sample_gallery("g1")).unwrap();

        assert_eq!(add_artworks(&db, "g1", &ids(&["a", "b"]), &Utc::now()).unwrap(), 2);
        assert_eq!(add_artworks(&db, "g1", &ids(&["b", "c"]), &Utc::now()).unwrap(), 1);

        let gallery = find_by_id(&db, "g1").unwrap().unwrap();
        assert_eq!(gallery.artworks, ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_add_empty_still_stamps() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &sample_gallery("g1")).unwrap();
        let before = find_by_id(&db, "g1").unwrap().unwrap();

        assert_eq!(add_artworks(&db, "g1", &[], &Utc::now()).unwrap(), 0);

        let after = find_by_id(&db, "g1").unwrap().unwrap();
        assert!(after.last_import_at.is_some());
        assert!(after.updated_at > before.updated_at);
    }
}
