//! Archive integrity verification.
//!
//! An archive is valid when its full table of contents can be enumerated
//! without extraction. The check never mutates the archive; any read or
//! format error classifies it as corrupt.

use flate2::read::GzDecoder;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::journal::Journal;
use crate::utils::errors::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid { entries: usize },
    Corrupt(String),
}

/// Verifies `path`, writing one journal line with the outcome.
pub async fn verify(path: &Path, journal: &Journal) -> Result<Verdict> {
    let owned: PathBuf = path.to_path_buf();
    let outcome = tokio::task::spawn_blocking(move || enumerate(&owned))
        .await
        .map_err(|e| EngineError::Integrity(format!("verification task failed: {e}")))?;

    let verdict = match outcome {
        Ok(entries) => Verdict::Valid { entries },
        Err(e) => Verdict::Corrupt(e.to_string()),
    };

    match &verdict {
        Verdict::Valid { entries } => {
            journal.record(&format!("verified {}: {} entries", path.display(), entries));
        }
        Verdict::Corrupt(detail) => {
            journal.record(&format!(
                "verification of {} failed: {}",
                path.display(),
                detail
            ));
        }
    }

    Ok(verdict)
}

fn enumerate(path: &Path) -> std::io::Result<usize> {
    let file = std::fs::File::open(path)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);

    let mut entries = 0usize;
    for entry in archive.entries()? {
        entry?;
        entries += 1;
    }
    Ok(entries)
}
