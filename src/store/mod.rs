//! Archive naming and store enumeration.
//!
//! An archive store is a flat directory of `{volume}-{host}-{timestamp}.tar.gz`
//! files. Host labels never contain `-`, so the three fields can be split
//! unambiguously from the right and two distinct (volume, host, timestamp)
//! triples never collide on a file name.

pub mod retention;
pub mod verify;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::errors::{EngineError, Result};

const ARCHIVE_SUFFIX: &str = ".tar.gz";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// A completed archive sitting in the store.
#[derive(Debug, Clone)]
pub struct Archive {
    pub volume: String,
    pub host: String,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl Archive {
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}{}",
            self.volume,
            self.host,
            self.timestamp.format(TIMESTAMP_FORMAT),
            ARCHIVE_SUFFIX
        )
    }
}

/// Flat directory of completed archives.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Derives the archive path for a (volume, host, timestamp) triple.
    /// Deterministic and injective over valid inputs.
    pub fn archive_path(&self, volume: &str, host: &str, timestamp: DateTime<Utc>) -> Result<PathBuf> {
        validate_volume_name(volume)?;
        let host = sanitize_host_label(host);
        Ok(self.dir.join(format!(
            "{}-{}-{}{}",
            volume,
            host,
            timestamp.format(TIMESTAMP_FORMAT),
            ARCHIVE_SUFFIX
        )))
    }

    /// Enumerates archives in the store. Files not matching the naming
    /// pattern are skipped. An empty store yields an empty Vec; a missing
    /// store directory is an I/O error.
    pub fn list(&self) -> Result<Vec<Archive>> {
        let mut archives = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((volume, host, timestamp)) = parse_archive_name(name) {
                archives.push(Archive {
                    volume,
                    host,
                    timestamp,
                    path: entry.path(),
                    size_bytes: metadata.len(),
                });
            }
        }
        archives.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(archives)
    }
}

/// Volume names come from the runtime but still flow into file names, so
/// anything that could smuggle a path separator or read as an option is
/// rejected up front.
pub fn validate_volume_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "invalid volume name: {:?}",
            name
        )))
    }
}

/// Host labels share the volume charset minus `-`, which separates the
/// file name fields. Every other byte maps to `_`.
pub fn sanitize_host_label(raw: &str) -> String {
    let label: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if label.is_empty() {
        "unknown".to_string()
    } else {
        label
    }
}

fn parse_archive_name(name: &str) -> Option<(String, String, DateTime<Utc>)> {
    let stem = name.strip_suffix(ARCHIVE_SUFFIX)?;
    let mut fields = stem.rsplitn(3, '-');
    let timestamp = fields.next()?;
    let host = fields.next()?;
    let volume = fields.next()?;
    if volume.is_empty() || host.is_empty() {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    Some((
        volume.to_string(),
        host.to_string(),
        Utc.from_utc_datetime(&naive),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        let naive = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap();
        Utc.from_utc_datetime(&naive)
    }

    #[test]
    fn test_archive_path_format() {
        let store = ArchiveStore::new("/backups");
        let path = store
            .archive_path("appdata", "host1", ts("20260807T142530"))
            .unwrap();
        assert_eq!(
            path,
            PathBuf::from("/backups/appdata-host1-20260807T142530.tar.gz")
        );
    }

    #[test]
    fn test_archive_path_is_injective() {
        let store = ArchiveStore::new("/backups");
        let stamp = ts("20260807T142530");
        let triples = [
            ("app-db", "host1"),
            ("app", "db.host1"),
            ("appdb", "host1"),
            ("app-db", "host2"),
        ];
        let mut paths = Vec::new();
        for (volume, host) in triples {
            paths.push(store.archive_path(volume, host, stamp).unwrap());
        }
        let other_stamp = store.archive_path("app-db", "host1", ts("20260807T142531")).unwrap();
        paths.push(other_stamp);

        for (i, a) in paths.iter().enumerate() {
            for b in paths.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_volume_name_validation() {
        assert!(validate_volume_name("appdata").is_ok());
        assert!(validate_volume_name("app-data_v2.1").is_ok());
        assert!(validate_volume_name("").is_err());
        assert!(validate_volume_name("../etc").is_err());
        assert!(validate_volume_name("a/b").is_err());
        assert!(validate_volume_name("-rf").is_err());
    }

    #[test]
    fn test_sanitize_host_label() {
        assert_eq!(sanitize_host_label("host1"), "host1");
        assert_eq!(sanitize_host_label("my-laptop"), "my_laptop");
        assert_eq!(sanitize_host_label("a/b c"), "a_b_c");
        assert_eq!(sanitize_host_label(""), "unknown");
    }

    #[test]
    fn test_parse_roundtrip() {
        let (volume, host, timestamp) =
            parse_archive_name("app-db-my_laptop-20260807T142530.tar.gz").unwrap();
        assert_eq!(volume, "app-db");
        assert_eq!(host, "my_laptop");
        assert_eq!(timestamp, ts("20260807T142530"));
    }

    #[test]
    fn test_list_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path().join("does-not-exist"));
        assert!(matches!(store.list(), Err(EngineError::Io(_))));
    }

    #[test]
    fn test_list_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("data-host1-20260807T142530.tar.gz"), b"x").unwrap();
        std::fs::write(
            dir.path().join("data-host1-20260807T142530.tar.gz.partial"),
            b"x",
        )
        .unwrap();
        std::fs::write(dir.path().join("data-host1-notadate.tar.gz"), b"x").unwrap();

        let store = ArchiveStore::new(dir.path());
        let archives = store.list().unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].volume, "data");
        assert_eq!(archives[0].host, "host1");
        assert_eq!(archives[0].size_bytes, 1);
    }
}
