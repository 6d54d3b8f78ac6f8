//! Job repository: the `import_jobs` record and its atomic mutations.
//!
//! Every mutation here is a single conditional statement or a single
//! transaction. Callers never read a counter, modify it, and write it back.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{ErrorLevel, ErrorMarker, ImportJob, JobStatus};

/// Column values for a job that has not been written yet.
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub id: &'a str,
    pub gallery_id: &'a str,
    pub course_id: &'a str,
    pub assignment_id: &'a str,
    pub created_by: &'a str,
}

/// Raw columns of an `import_jobs` row.
struct JobRow {
    id: String,
    gallery_id: String,
    course_id: String,
    assignment_id: String,
    status: String,
    progress: i64,
    total_units: i64,
    totals_known: bool,
    processed_units: i64,
    failed_units: i64,
    created_by: String,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
    error_message: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            gallery_id: row.get("gallery_id")?,
            course_id: row.get("course_id")?,
            assignment_id: row.get("assignment_id")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            total_units: row.get("total_units")?,
            totals_known: row.get("totals_known")?,
            processed_units: row.get("processed_units")?,
            failed_units: row.get("failed_units")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
            error_message: row.get("error_message")?,
        })
    }

    fn into_job(self) -> Result<ImportJob, DatabaseError> {
        Ok(ImportJob {
            status: JobStatus::parse(&self.status, &self.id),
            progress: self.progress.clamp(0, 100) as u8,
            total_submission_units: self.total_units.max(0) as u32,
            totals_known: self.totals_known,
            processed_units: self.processed_units.max(0) as u32,
            failed_units: self.failed_units.max(0) as u32,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            completed_at: parse_optional_timestamp(self.completed_at)?,
            id: self.id,
            gallery_id: self.gallery_id,
            course_id: self.course_id,
            assignment_id: self.assignment_id,
            created_by: self.created_by,
            error_message: self.error_message,
        })
    }
}

/// A failure marker about to be appended to a job's error list.
#[derive(Debug, Clone)]
pub struct NewErrorMarker {
    pub marker: String,
    pub message: Option<String>,
}

impl NewErrorMarker {
    pub fn new(marker: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            message: Some(message.into()),
        }
    }
}

/// Inserts a new job in `pending`.
pub fn insert(db: &Database, job: &NewJob<'_>, now: &DateTime<Utc>) -> Result<(), DatabaseError> {
    let now = format_timestamp(now);
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO import_jobs (id, gallery_id, course_id, assignment_id, status,
             created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?6)",
            params![
                job.id,
                job.gallery_id,
                job.course_id,
                job.assignment_id,
                job.created_by,
                now
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ImportJob>, DatabaseError> {
    let row = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM import_jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?)
    })?;
    row.map(JobRow::into_job).transpose()
}

/// Lists the jobs that targeted a gallery, newest first.
pub fn find_by_gallery(db: &Database, gallery_id: &str) -> Result<Vec<ImportJob>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM import_jobs WHERE gallery_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![gallery_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(JobRow::into_job).collect()
}

/// `pending → processing`. Returns false if the job was not pending.
pub fn mark_processing(db: &Database, id: &str, now: &DateTime<Utc>) -> Result<bool, DatabaseError> {
    let now = format_timestamp(now);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE import_jobs SET status = 'processing', updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, now],
        )?;
        Ok(changed == 1)
    })
}

/// Records the number of dispatched work units and lifts progress to the
/// given checkpoint. From here on the job may complete.
pub fn set_totals(
    db: &Database,
    id: &str,
    total_units: u32,
    checkpoint: u8,
    now: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let now = format_timestamp(now);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE import_jobs
             SET total_units = ?2, totals_known = 1, progress = MAX(progress, ?3), updated_at = ?4
             WHERE id = ?1 AND status = 'processing'",
            params![id, total_units, checkpoint.min(99), now],
        )?;
        Ok(changed == 1)
    })
}

/// Raises progress to `progress` if it is higher than the stored value.
/// Only terminal transitions may write 100.
pub fn advance_progress(
    db: &Database,
    id: &str,
    progress: u8,
    now: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let now = format_timestamp(now);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE import_jobs SET progress = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'processing' AND progress < ?2",
            params![id, progress.min(99), now],
        )?;
        Ok(changed == 1)
    })
}

fn claim_unit(
    tx: &Transaction<'_>,
    job_id: &str,
    unit_key: &str,
    outcome: &str,
    artifact_id: Option<&str>,
    now: &str,
) -> Result<bool, DatabaseError> {
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO job_units (job_id, unit_key, outcome, artifact_id, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![job_id, unit_key, outcome, artifact_id, now],
    )?;
    Ok(inserted == 1)
}

fn append_markers(
    tx: &Transaction<'_>,
    job_id: &str,
    unit_key: Option<&str>,
    level: ErrorLevel,
    markers: &[NewErrorMarker],
    now: &str,
) -> Result<(), DatabaseError> {
    let mut stmt = tx.prepare(
        "INSERT INTO job_errors (job_id, unit_key, marker, level, message, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for marker in markers {
        stmt.execute(params![
            job_id,
            unit_key,
            marker.marker,
            level.as_str(),
            marker.message,
            now
        ])?;
    }
    Ok(())
}

/// Resolves a work unit as processed and appends the file-level markers of
/// attachments that failed inside it.
///
/// Returns false when the unit had already been resolved; in that case
/// nothing is written.
pub fn record_unit_processed(
    db: &Database,
    job_id: &str,
    unit_key: &str,
    artifact_id: &str,
    file_errors: &[NewErrorMarker],
    now: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let now = format_timestamp(now);
    db.with_transaction(|tx| {
        if !claim_unit(tx, job_id, unit_key, "processed", Some(artifact_id), &now)? {
            return Ok(false);
        }
        tx.execute(
            "UPDATE import_jobs SET processed_units = processed_units + 1, updated_at = ?2
             WHERE id = ?1",
            params![job_id, now],
        )?;
        append_markers(tx, job_id, Some(unit_key), ErrorLevel::File, file_errors, &now)?;
        Ok(true)
    })
}

/// Resolves a work unit as failed and appends its unit-level markers.
///
/// Returns false when the unit had already been resolved.
pub fn record_unit_failed(
    db: &Database,
    job_id: &str,
    unit_key: &str,
    markers: &[NewErrorMarker],
    now: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let now = format_timestamp(now);
    db.with_transaction(|tx| {
        if !claim_unit(tx, job_id, unit_key, "failed", None, &now)? {
            return Ok(false);
        }
        tx.execute(
            "UPDATE import_jobs SET failed_units = failed_units + 1, updated_at = ?2
             WHERE id = ?1",
            params![job_id, now],
        )?;
        append_markers(tx, job_id, Some(unit_key), ErrorLevel::Unit, markers, &now)?;
        Ok(true)
    })
}

/// Appends a file-level marker outside of any unit resolution, e.g. for an
/// attachment whose download failed before grouping.
pub fn record_file_error(
    db: &Database,
    job_id: &str,
    marker: &NewErrorMarker,
    now: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let now = format_timestamp(now);
    db.with_transaction(|tx| {
        append_markers(
            tx,
            job_id,
            None,
            ErrorLevel::File,
            std::slice::from_ref(marker),
            &now,
        )
    })
}

/// Whether a delivery of this unit has already been resolved.
pub fn is_unit_resolved(db: &Database, job_id: &str, unit_key: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM job_units WHERE job_id = ?1 AND unit_key = ?2",
                params![job_id, unit_key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    })
}

/// The job's `errorFiles` list in recording order.
pub fn error_markers(db: &Database, job_id: &str) -> Result<Vec<ErrorMarker>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT marker, level, unit_key, message FROM job_errors
             WHERE job_id = ?1 ORDER BY id",
        )?;
        let markers = stmt
            .query_map(params![job_id], |row| {
                let level: String = row.get(1)?;
                Ok(ErrorMarker {
                    marker: row.get(0)?,
                    level: ErrorLevel::parse(&level),
                    unit_key: row.get(2)?,
                    message: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(markers)
    })
}

/// `processing → completed` if every dispatched unit has resolved.
///
/// This statement is the linearization point of completion: exactly one
/// caller observes `true` for a given job.
pub fn try_complete(db: &Database, id: &str, now: &DateTime<Utc>) -> Result<bool, DatabaseError> {
    let now = format_timestamp(now);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE import_jobs
             SET status = 'completed', progress = 100, completed_at = ?2, updated_at = ?2
             WHERE id = ?1
               AND status = 'processing'
               AND totals_known = 1
               AND processed_units + failed_units >= total_units",
            params![id, now],
        )?;
        Ok(changed == 1)
    })
}

/// Moves a non-terminal job to `error`. Terminal states are left untouched.
pub fn mark_error(
    db: &Database,
    id: &str,
    message: &str,
    now: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let now = format_timestamp(now);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE import_jobs SET status = 'error', error_message = ?2, updated_at = ?3
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id, message, now],
        )?;
        Ok(changed == 1)
    })
}
