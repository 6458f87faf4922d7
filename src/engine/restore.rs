//! Restore engine.
//!
//! Streams an archive's decompressed contents back into a volume,
//! overwriting whatever the volume held. Operator confirmation is the
//! caller's concern; by the time this runs the operator has agreed.

use async_compression::tokio::bufread::GzipDecoder;
use std::path::Path;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use crate::journal::Journal;
use crate::progress::{CountingReader, ProgressObserver};
use crate::runtime::VolumeRuntime;
use crate::store::validate_volume_name;
use crate::utils::errors::{EngineError, Result};

pub struct RestoreEngine<R: VolumeRuntime> {
    runtime: Arc<R>,
    journal: Arc<Journal>,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancellationToken,
}

impl<R: VolumeRuntime> RestoreEngine<R> {
    pub fn new(
        runtime: Arc<R>,
        journal: Arc<Journal>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self::with_cancel(runtime, journal, observer, CancellationToken::new())
    }

    pub fn with_cancel(
        runtime: Arc<R>,
        journal: Arc<Journal>,
        observer: Arc<dyn ProgressObserver>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            journal,
            observer,
            cancel,
        }
    }

    /// Overwrites `volume` with the contents of `archive`. Progress counts
    /// compressed bytes against the archive's on-disk size; the stream is
    /// decompressed after the counter.
    pub async fn restore(&self, archive: &Path, volume: &str) -> Result<()> {
        validate_volume_name(volume)?;
        let compressed_len = tokio::fs::metadata(archive)
            .await
            .map_err(|e| {
                EngineError::Validation(format!("archive {} unreadable: {}", archive.display(), e))
            })?
            .len();

        let label = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| archive.display().to_string());

        self.journal.record(&format!(
            "restore of {} into volume {} started",
            label, volume
        ));

        let file = tokio::fs::File::open(archive).await?;
        let counted = CountingReader::new(
            file,
            &label,
            Some(compressed_len),
            Arc::clone(&self.observer),
        );
        let mut source = GzipDecoder::new(BufReader::new(counted));

        let result = tokio::select! {
            result = self.runtime.write_volume_tree(volume, &mut source) => result,
            _ = self.cancel.cancelled() => Err(EngineError::Interrupted),
        };

        match result {
            Ok(()) => {
                self.journal.record(&format!(
                    "restore of {} into volume {} completed",
                    label, volume
                ));
                Ok(())
            }
            Err(e) => {
                self.journal.record(&format!(
                    "restore of {} into volume {} failed: {}",
                    label, volume, e
                ));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write as _;
    use std::sync::Mutex;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

    struct CaptureRuntime {
        restored: Mutex<Vec<(String, Vec<u8>)>>,
        fail_import: bool,
    }

    impl CaptureRuntime {
        fn new() -> Self {
            Self {
                restored: Mutex::new(Vec::new()),
                fail_import: false,
            }
        }
    }

    impl VolumeRuntime for CaptureRuntime {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn list_volumes(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn measure_volume_size(&self, _name: &str) -> Result<Option<u64>> {
            Ok(None)
        }

        async fn read_volume_tree(
            &self,
            _name: &str,
            _sink: &mut (dyn AsyncWrite + Send + Unpin),
        ) -> Result<u64> {
            Err(EngineError::Stream("not used".into()))
        }

        async fn write_volume_tree(
            &self,
            name: &str,
            source: &mut (dyn AsyncRead + Send + Unpin),
        ) -> Result<()> {
            if self.fail_import {
                return Err(EngineError::Stream("import exited with 1".into()));
            }
            let mut bytes = Vec::new();
            source.read_to_end(&mut bytes).await?;
            self.restored
                .lock()
                .unwrap()
                .push((name.to_string(), bytes));
            Ok(())
        }
    }

    fn gzipped(payload: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap()
    }

    fn restore_engine(runtime: Arc<CaptureRuntime>, dir: &Path) -> RestoreEngine<CaptureRuntime> {
        let journal = Arc::new(Journal::open(&dir.join("backup.log")).unwrap());
        RestoreEngine::new(runtime, journal, Arc::new(NoProgress))
    }

    #[tokio::test]
    async fn test_restore_streams_decompressed_contents() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"tar stream stand-in".to_vec();
        let archive = dir.path().join("data-host1-20260807T120000.tar.gz");
        std::fs::write(&archive, gzipped(&payload)).unwrap();

        let runtime = Arc::new(CaptureRuntime::new());
        let engine = restore_engine(Arc::clone(&runtime), dir.path());

        engine.restore(&archive, "data").await.unwrap();

        let restored = runtime.restored.lock().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].0, "data");
        assert_eq!(restored[0].1, payload);
    }

    #[tokio::test]
    async fn test_restore_missing_archive_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(CaptureRuntime::new());
        let engine = restore_engine(Arc::clone(&runtime), dir.path());

        let result = engine
            .restore(&dir.path().join("absent.tar.gz"), "data")
            .await;

        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert!(runtime.restored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_failure_is_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("data-host1-20260807T120000.tar.gz");
        std::fs::write(&archive, gzipped(b"payload")).unwrap();

        let mut runtime = CaptureRuntime::new();
        runtime.fail_import = true;
        let engine = restore_engine(Arc::new(runtime), dir.path());

        let result = engine.restore(&archive, "data").await;
        assert!(matches!(result, Err(EngineError::Stream(_))));

        let log = std::fs::read_to_string(dir.path().join("backup.log")).unwrap();
        assert!(log.contains("failed"));
    }

    #[tokio::test]
    async fn test_restore_rejects_bad_volume_name() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(CaptureRuntime::new());
        let engine = restore_engine(Arc::clone(&runtime), dir.path());

        let result = engine
            .restore(&dir.path().join("x.tar.gz"), "../host-root")
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }
}
