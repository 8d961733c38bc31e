//! Retention sweep for the recordings directory.
//!
//! Deletes recordings older than the configured retention window. Files
//! carrying an in-progress marker extension are always skipped, so a sweep
//! racing an active session or a running pipeline never eats its inputs.

use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::paths;

/// Removes files older than `retention`, returning the number deleted.
/// Errors are logged and skipped; a missing directory is a silent no-op.
pub fn sweep_recordings(dir: &Path, retention: Duration) -> u32 {
    if !dir.exists() {
        return 0;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(target: "pipeline", "failed to read recordings dir: {}", e);
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut deleted = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        if paths::is_in_progress(&path) {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!(target: "pipeline", "no mtime for {:?}: {}", path, e);
                continue;
            }
        };

        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > retention {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!(target: "pipeline", "retention sweep deleted {:?}", path);
                    deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(target: "pipeline", "failed to delete {:?}: {}", path, e);
                }
            }
        }
    }

    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch_old(path: &Path, age: Duration) {
        fs::write(path, b"x").unwrap();
        let mtime = SystemTime::now() - age;
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(mtime).unwrap();
    }

    #[test]
    fn deletes_only_aged_files() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.mp4");
        let fresh = dir.path().join("fresh.mp4");
        touch_old(&old, Duration::from_secs(86_400 * 10));
        fs::write(&fresh, b"x").unwrap();

        let deleted = sweep_recordings(dir.path(), Duration::from_secs(86_400 * 7));
        assert_eq!(deleted, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn skips_in_progress_markers() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("session_mic.pcm.tmp");
        let part = dir.path().join("half.part");
        touch_old(&tmp, Duration::from_secs(86_400 * 30));
        touch_old(&part, Duration::from_secs(86_400 * 30));

        let deleted = sweep_recordings(dir.path(), Duration::from_secs(3600));
        assert_eq!(deleted, 0);
        assert!(tmp.exists());
        assert!(part.exists());
    }

    #[test]
    fn missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(sweep_recordings(&missing, Duration::from_secs(1)), 0);
    }
}
