//! Age-based retention cleanup.

use chrono::{DateTime, Duration, Utc};
use std::fs;
use tracing::warn;

use super::ArchiveStore;
use crate::journal::Journal;
use crate::utils::errors::Result;

/// Deletes archives older than `retention_days`, returning how many were
/// removed. Best-effort: a deletion failure is journaled and skipped, the
/// sweep continues with the remaining files.
pub fn cleanup(
    store: &ArchiveStore,
    retention_days: i64,
    now: DateTime<Utc>,
    journal: &Journal,
) -> Result<usize> {
    let cutoff = now - Duration::days(retention_days);
    let mut deleted = 0usize;

    for archive in store.list()? {
        if archive.timestamp >= cutoff {
            continue;
        }
        let age_days = (now - archive.timestamp).num_days();
        match fs::remove_file(&archive.path) {
            Ok(()) => {
                journal.record(&format!(
                    "retention: deleted {} (age {} days)",
                    archive.file_name(),
                    age_days
                ));
                deleted += 1;
            }
            Err(e) => {
                warn!("retention: failed to delete {}: {}", archive.path.display(), e);
                journal.record(&format!(
                    "retention: failed to delete {}: {}",
                    archive.file_name(),
                    e
                ));
            }
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::Path;

    fn journal(dir: &Path) -> Journal {
        Journal::open(&dir.join("backup.log")).unwrap()
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"archive").unwrap();
    }

    #[test]
    fn test_cleanup_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();

        // 31 days old: past the threshold. 29 days old: within it.
        touch(dir.path(), "data-host1-20260707T120000.tar.gz");
        touch(dir.path(), "data-host1-20260709T120000.tar.gz");

        let deleted = cleanup(&store, 30, now, &journal(dir.path())).unwrap();

        assert_eq!(deleted, 1);
        assert!(!dir.path().join("data-host1-20260707T120000.tar.gz").exists());
        assert!(dir.path().join("data-host1-20260709T120000.tar.gz").exists());
    }

    #[test]
    fn test_cleanup_ignores_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();

        touch(dir.path(), "data-host1-20250101T000000.tar.gz.partial");

        let deleted = cleanup(&store, 30, now, &journal(dir.path())).unwrap();

        assert_eq!(deleted, 0);
        assert!(dir
            .path()
            .join("data-host1-20250101T000000.tar.gz.partial")
            .exists());
    }

    #[test]
    fn test_cleanup_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        let deleted = cleanup(&store, 30, Utc::now(), &journal(dir.path())).unwrap();
        assert_eq!(deleted, 0);
    }

    #[test]
    fn test_cleanup_journals_each_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        let log_dir = tempfile::tempdir().unwrap();
        let journal = journal(log_dir.path());
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();

        touch(dir.path(), "a-host1-20260101T000000.tar.gz");
        touch(dir.path(), "b-host1-20260102T000000.tar.gz");

        let deleted = cleanup(&store, 30, now, &journal).unwrap();
        assert_eq!(deleted, 2);

        let log = std::fs::read_to_string(log_dir.path().join("backup.log")).unwrap();
        assert_eq!(log.matches("retention: deleted").count(), 2);
    }
}
