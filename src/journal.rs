//! Operator-facing event log.
//!
//! Append-only, line-oriented: one `{timestamp} - {message}` line per event.
//! Concurrent backup jobs share the sink; each line is written in a single
//! call so lines never interleave.

use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

pub struct Journal {
    file: Mutex<File>,
}

impl Journal {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one event line. Journaling is best-effort: a failed write is
    /// reported through tracing but never fails the operation that logged.
    pub fn record(&self, message: &str) {
        let line = format!("{} - {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"), message);
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()) {
                    warn!("journal write failed: {}", e);
                }
            }
            Err(_) => warn!("journal lock poisoned, dropping entry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.log");
        let journal = Journal::open(&path).unwrap();

        journal.record("backup of volume data started");
        journal.record("backup of volume data completed");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            // "YYYY-MM-DD HH:MM:SS - message"
            let (stamp, message) = line.split_once(" - ").unwrap();
            assert_eq!(stamp.len(), 19);
            assert!(stamp.as_bytes()[4] == b'-' && stamp.as_bytes()[13] == b':');
            assert!(message.starts_with("backup of volume data"));
        }
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/backup.log");
        let journal = Journal::open(&path).unwrap();
        journal.record("hello");
        assert!(path.exists());
    }
}
