//! Object storage for staged attachments and published artwork images.

pub mod filesystem;
pub mod sweep;

pub use filesystem::LocalObjectStore;
pub use sweep::sweep_staging;

use crate::error::StorageError;

/// Flat key/value object store addressed by `/`-separated paths.
///
/// `delete` of a missing object succeeds, so staged files can be discarded
/// again when a work unit is redelivered.
pub trait ObjectStore: Send + Sync {
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError>;

    fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// URL under which a published object is served to the gallery UI.
    fn public_url(&self, path: &str) -> String;
}

/// Staging path for one downloaded attachment. The index keeps two
/// attachments with the same display name apart.
pub fn staging_path(prefix: &str, job_id: &str, learner_id: &str, index: usize, name: &str) -> String {
    format!(
        "{}/{}/{}/{}-{}",
        prefix.trim_end_matches('/'),
        job_id,
        sanitize_segment(learner_id),
        index,
        sanitize_segment(name)
    )
}

/// Published path for a display image (`thumbnail` selects the `-thumb`
/// variant). Deterministic, so redelivery overwrites instead of leaking.
pub fn artwork_path(prefix: &str, artifact_id: &str, image_id: &str, thumbnail: bool) -> String {
    let suffix = if thumbnail { "-thumb" } else { "" };
    format!(
        "{}/{}/{}{}.jpg",
        prefix.trim_end_matches('/'),
        artifact_id,
        image_id,
        suffix
    )
}

/// Replaces characters that would break a path segment.
fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}
