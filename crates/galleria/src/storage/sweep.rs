use std::path::Path;
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

/// Removes staged files under `root/prefix` whose modification time is older
/// than `older_than`, then prunes directories left empty. Returns the number
/// of files removed.
///
/// Staged files normally disappear when their work unit is processed; this
/// is the primitive an external scheduled sweep calls for abandoned ones.
pub fn sweep_staging(root: &Path, prefix: &str, older_than: Duration) -> usize {
    let staging_root = root.join(prefix.trim_matches('/'));
    if !staging_root.is_dir() {
        return 0;
    }

    let cutoff = SystemTime::now()
        .checked_sub(older_than)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;

    for entry in WalkDir::new(&staging_root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
        if modified.is_some_and(|m| m < cutoff) {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to sweep {}: {}", entry.path().display(), e),
            }
        }
    }

    // Deepest first, so parents become empty before they are visited.
    for entry in WalkDir::new(&staging_root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        // Fails on non-empty directories, which is what we want.
        let _ = std::fs::remove_dir(entry.path());
    }

    if removed > 0 {
        log::info!(
            "Swept {} abandoned staged files from {}",
            removed,
            staging_root.display()
        );
    }
    removed
}
