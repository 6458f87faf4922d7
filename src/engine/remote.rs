//! Remote restore orchestration.
//!
//! Two-phase protocol: fetch the archive from the remote store into the
//! local one, then apply it with the restore engine. The apply phase never
//! runs unless the fetch succeeded, and a fetched copy is kept on disk even
//! when the apply phase fails so the operator can retry locally.

use std::fmt;
use std::path::PathBuf;

use crate::engine::restore::RestoreEngine;
use crate::runtime::VolumeRuntime;
use crate::store::ArchiveStore;
use crate::transfer::{RemoteEndpoint, RemoteTransport, TransferEngine};
use crate::utils::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteRestoreStage {
    Fetch,
    Restore,
}

impl fmt::Display for RemoteRestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteRestoreStage::Fetch => write!(f, "fetch"),
            RemoteRestoreStage::Restore => write!(f, "restore"),
        }
    }
}

#[derive(Debug)]
pub struct RemoteRestoreError {
    pub stage: RemoteRestoreStage,
    pub source: EngineError,
}

impl fmt::Display for RemoteRestoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote restore failed during {}: {}", self.stage, self.source)
    }
}

impl std::error::Error for RemoteRestoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Fetches `remote_name` from `endpoint` into `store`, then restores it
/// into `volume`. Returns the path of the local copy, which is retained
/// whatever the outcome of the apply phase.
pub async fn remote_restore<T: RemoteTransport, R: VolumeRuntime>(
    transfer: &TransferEngine<T>,
    restore: &RestoreEngine<R>,
    store: &ArchiveStore,
    endpoint: &RemoteEndpoint,
    remote_name: &str,
    volume: &str,
) -> Result<PathBuf, RemoteRestoreError> {
    let local = transfer
        .fetch(endpoint, remote_name, store)
        .await
        .map_err(|source| RemoteRestoreError {
            stage: RemoteRestoreStage::Fetch,
            source,
        })?;

    restore
        .restore(&local, volume)
        .await
        .map_err(|source| RemoteRestoreError {
            stage: RemoteRestoreStage::Restore,
            source,
        })?;

    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Journal;
    use crate::progress::{NoProgress, ProgressObserver};
    use crate::utils::errors::Result;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write as _;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

    struct FakeTransport {
        fail_fetch: bool,
        payload: Vec<u8>,
    }

    impl RemoteTransport for FakeTransport {
        async fn probe(&self, _endpoint: &RemoteEndpoint) -> Result<()> {
            Ok(())
        }

        async fn exec(&self, _endpoint: &RemoteEndpoint, _command: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn push_file(
            &self,
            _endpoint: &RemoteEndpoint,
            _local: &Path,
            _remote: &str,
            _observer: Arc<dyn ProgressObserver>,
        ) -> Result<()> {
            Ok(())
        }

        async fn fetch_file(
            &self,
            _endpoint: &RemoteEndpoint,
            _remote: &str,
            local: &Path,
            _observer: Arc<dyn ProgressObserver>,
        ) -> Result<()> {
            if self.fail_fetch {
                return Err(EngineError::Stream("remote copy interrupted".into()));
            }
            std::fs::write(local, &self.payload)?;
            Ok(())
        }
    }

    struct FakeRuntime {
        fail_import: bool,
        imported: AtomicBool,
    }

    impl VolumeRuntime for FakeRuntime {
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
            _name: &str,
            source: &mut (dyn AsyncRead + Send + Unpin),
        ) -> Result<()> {
            self.imported.store(true, Ordering::SeqCst);
            if self.fail_import {
                return Err(EngineError::Stream("import exited with 1".into()));
            }
            let mut bytes = Vec::new();
            source.read_to_end(&mut bytes).await?;
            Ok(())
        }
    }

    struct Fixture {
        transfer: TransferEngine<FakeTransport>,
        restore: RestoreEngine<FakeRuntime>,
        runtime: Arc<FakeRuntime>,
        store: ArchiveStore,
    }

    fn gzipped(payload: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap()
    }

    fn fixture(dir: &Path, fail_fetch: bool, fail_import: bool) -> Fixture {
        let journal = Arc::new(Journal::open(&dir.join("backup.log")).unwrap());
        let transport = FakeTransport {
            fail_fetch,
            payload: gzipped(b"tar stream stand-in"),
        };
        let runtime = Arc::new(FakeRuntime {
            fail_import,
            imported: AtomicBool::new(false),
        });
        Fixture {
            transfer: TransferEngine::new(
                transport,
                Arc::clone(&journal),
                Arc::new(NoProgress),
                "/remote/archives",
            ),
            restore: RestoreEngine::new(Arc::clone(&runtime), journal, Arc::new(NoProgress)),
            runtime,
            store: ArchiveStore::new(dir.join("archives")),
        }
    }

    fn endpoint() -> RemoteEndpoint {
        RemoteEndpoint {
            user: "backup".to_string(),
            address: "192.168.1.10".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path(), true, false);

        let result = remote_restore(
            &fx.transfer,
            &fx.restore,
            &fx.store,
            &endpoint(),
            "data-host1-20260807T120000.tar.gz",
            "data",
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.stage, RemoteRestoreStage::Fetch);
        // the restore phase must never have run
        assert!(!fx.runtime.imported.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_restore_failure_retains_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path(), false, true);

        let result = remote_restore(
            &fx.transfer,
            &fx.restore,
            &fx.store,
            &endpoint(),
            "data-host1-20260807T120000.tar.gz",
            "data",
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.stage, RemoteRestoreStage::Restore);
        let local = fx
            .store
            .dir()
            .join("data-host1-20260807T120000.tar.gz");
        assert!(local.exists());
    }

    #[tokio::test]
    async fn test_both_phases_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path(), false, false);

        let local = remote_restore(
            &fx.transfer,
            &fx.restore,
            &fx.store,
            &endpoint(),
            "data-host1-20260807T120000.tar.gz",
            "data",
        )
        .await
        .unwrap();

        assert!(local.exists());
        assert!(fx.runtime.imported.load(Ordering::SeqCst));
    }
}
