//! Backup job runner.
//!
//! Fans out one task per selected volume, joins them all, and reports
//! aggregate per-volume results. Retention cleanup runs as a best-effort
//! pre-step before any job launches. Each job streams the volume's tar
//! output through gzip into a `.partial` file, verifies it, and only then
//! renames it to its final archive name.

pub mod remote;
pub mod restore;

use chrono::Utc;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use async_compression::tokio::write::GzipEncoder;

use crate::journal::Journal;
use crate::progress::{CountingWriter, ProgressObserver};
use crate::runtime::VolumeRuntime;
use crate::store::verify::{self, Verdict};
use crate::store::{retention, validate_volume_name, ArchiveStore};
use crate::utils::errors::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    BackupFailed,
    VerifyFailed,
}

/// Per-volume outcome of one backup invocation.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub volume: String,
    pub archive_path: Option<PathBuf>,
    pub status: JobStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub retention_days: i64,
    pub max_concurrent_jobs: usize,
}

pub struct BackupEngine<R: VolumeRuntime> {
    runtime: Arc<R>,
    store: ArchiveStore,
    journal: Arc<Journal>,
    observer: Arc<dyn ProgressObserver>,
    options: EngineOptions,
    cancel: CancellationToken,
}

impl<R: VolumeRuntime> BackupEngine<R> {
    pub fn new(
        runtime: Arc<R>,
        store: ArchiveStore,
        journal: Arc<Journal>,
        observer: Arc<dyn ProgressObserver>,
        options: EngineOptions,
    ) -> Self {
        Self::with_cancel(
            runtime,
            store,
            journal,
            observer,
            options,
            CancellationToken::new(),
        )
    }

    pub fn with_cancel(
        runtime: Arc<R>,
        store: ArchiveStore,
        journal: Arc<Journal>,
        observer: Arc<dyn ProgressObserver>,
        options: EngineOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            store,
            journal,
            observer,
            options,
            cancel,
        }
    }

    /// Backs up every selected volume, one concurrent job per volume,
    /// and returns the per-volume results sorted by volume name. Job
    /// failures are isolated: they surface in the result, never here.
    pub async fn run_backup(&self, selected: &BTreeSet<String>) -> Result<Vec<JobResult>> {
        if selected.is_empty() {
            return Err(EngineError::Validation("no volumes selected".into()));
        }
        // a bad selection aborts before any job starts
        for volume in selected {
            validate_volume_name(volume)?;
        }
        self.store.ensure_exists()?;

        // Housekeeping pre-step: retention must never block a backup.
        match retention::cleanup(
            &self.store,
            self.options.retention_days,
            Utc::now(),
            &self.journal,
        ) {
            Ok(0) => {}
            Ok(n) => info!("retention removed {} expired archive(s)", n),
            Err(e) => warn!("retention cleanup failed: {}", e),
        }

        let host = local_host_label();
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_jobs.max(1)));
        let mut handles = Vec::with_capacity(selected.len());

        for volume in selected {
            let name = volume.clone();
            let volume = volume.clone();
            let runtime = Arc::clone(&self.runtime);
            let store = self.store.clone();
            let journal = Arc::clone(&self.journal);
            let observer = Arc::clone(&self.observer);
            let cancel = self.cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            let host = host.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return failed(volume, "job scheduler closed"),
                };
                if cancel.is_cancelled() {
                    return failed(volume, "interrupted before start");
                }
                run_one(
                    runtime.as_ref(),
                    &store,
                    &journal,
                    observer,
                    &cancel,
                    &host,
                    volume,
                )
                .await
            });
            handles.push((name, handle));
        }

        // Join barrier: every job finishes before the aggregate report.
        let mut results = Vec::with_capacity(handles.len());
        for (volume, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("backup task for {} panicked: {}", volume, e);
                    results.push(failed(volume, format!("job panicked: {e}")));
                }
            }
        }
        results.sort_by(|a, b| a.volume.cmp(&b.volume));
        Ok(results)
    }
}

async fn run_one<R: VolumeRuntime>(
    runtime: &R,
    store: &ArchiveStore,
    journal: &Journal,
    observer: Arc<dyn ProgressObserver>,
    cancel: &CancellationToken,
    host: &str,
    volume: String,
) -> JobResult {
    let timestamp = Utc::now();
    let final_path = match store.archive_path(&volume, host, timestamp) {
        Ok(path) => path,
        Err(e) => return failed(volume, e.to_string()),
    };
    let partial = partial_path(&final_path);

    // Advisory size probe; unknown size degrades the progress display only.
    let total = match runtime.measure_volume_size(&volume).await {
        Ok(size) => size,
        Err(e) => {
            warn!("size probe for volume {} failed: {}", volume, e);
            None
        }
    };

    journal.record(&format!(
        "backup of volume {} started -> {}",
        volume,
        final_path.display()
    ));

    if let Err(e) = stream_to_archive(runtime, &volume, &partial, total, observer, cancel).await {
        journal.record(&format!("backup of volume {} failed: {}", volume, e));
        return JobResult {
            volume,
            archive_path: Some(partial),
            status: JobStatus::BackupFailed,
            error: Some(e.to_string()),
        };
    }

    match verify::verify(&partial, journal).await {
        Ok(Verdict::Valid { entries }) => {
            if let Err(e) = tokio::fs::rename(&partial, &final_path).await {
                journal.record(&format!(
                    "backup of volume {} failed to finalize: {}",
                    volume, e
                ));
                return JobResult {
                    volume,
                    archive_path: Some(partial),
                    status: JobStatus::BackupFailed,
                    error: Some(e.to_string()),
                };
            }
            journal.record(&format!(
                "backup of volume {} completed ({} entries)",
                volume, entries
            ));
            JobResult {
                volume,
                archive_path: Some(final_path),
                status: JobStatus::Success,
                error: None,
            }
        }
        Ok(Verdict::Corrupt(detail)) => {
            // The partial file stays on disk for inspection.
            JobResult {
                volume,
                archive_path: Some(partial),
                status: JobStatus::VerifyFailed,
                error: Some(detail),
            }
        }
        Err(e) => JobResult {
            volume,
            archive_path: Some(partial),
            status: JobStatus::VerifyFailed,
            error: Some(e.to_string()),
        },
    }
}

async fn stream_to_archive<R: VolumeRuntime>(
    runtime: &R,
    volume: &str,
    partial: &Path,
    total: Option<u64>,
    observer: Arc<dyn ProgressObserver>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let file = tokio::fs::File::create(partial).await?;
    let encoder = GzipEncoder::new(tokio::io::BufWriter::new(file));
    let mut sink = CountingWriter::new(encoder, volume, total, observer);

    let bytes = tokio::select! {
        result = runtime.read_volume_tree(volume, &mut sink) => result?,
        _ = cancel.cancelled() => return Err(EngineError::Interrupted),
    };

    sink.shutdown()
        .await
        .map_err(|e| EngineError::Stream(format!("archive finalize failed: {e}")))?;
    Ok(bytes)
}

fn failed(volume: String, detail: impl Into<String>) -> JobResult {
    JobResult {
        volume,
        archive_path: None,
        status: JobStatus::BackupFailed,
        error: Some(detail.into()),
    }
}

fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    final_path.with_file_name(name)
}

fn local_host_label() -> String {
    let raw = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    crate::store::sanitize_host_label(&raw)
}
