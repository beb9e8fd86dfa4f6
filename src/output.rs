//! Output file naming.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Timestamp layout used in every session file name.
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M";

/// `<prefix><YYYYmmdd_HHMM>`
pub fn session_stem(prefix: &str, now: &DateTime<Local>) -> String {
    format!("{prefix}{}", now.format(STAMP_FORMAT))
}

/// `path` if nothing exists there yet, otherwise the first free
/// `<stem>_<n>.<ext>` for `n = 1, 2, ...`.
pub fn next_free_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    (1u32..)
        .map(|n| path.with_file_name(format!("{stem}_{n}{extension}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn test_session_stem_layout() {
        let now = Local
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 59)
            .single()
            .expect("unambiguous local time");
        assert_eq!(session_stem("video_", &now), "video_20240309_0705");
    }

    #[test]
    fn test_unused_path_is_returned_as_is() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("video_20240309_0705.avi");
        assert_eq!(next_free_path(&path), path);
    }

    #[test]
    fn test_repeated_sessions_get_distinct_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("video_20240309_0705.avi");

        let mut seen = HashSet::new();
        for _ in 0..5 {
            let free = next_free_path(&path);
            std::fs::write(&free, b"x").expect("write");
            assert!(seen.insert(free));
        }

        assert!(seen.contains(&dir.path().join("video_20240309_0705_4.avi")));
        assert_eq!(
            next_free_path(&path),
            dir.path().join("video_20240309_0705_5.avi")
        );
    }
}
