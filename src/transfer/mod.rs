//! Archive transfer to and from remote hosts.
//!
//! Every data operation is gated by two short-circuiting pre-flight checks:
//! the endpoint address must be a well-formed IPv4 address, and a short
//! authenticated probe must succeed. Probe failures and copy failures are
//! distinct, separately journaled failure kinds.

pub mod ssh;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::journal::Journal;
use crate::progress::ProgressObserver;
use crate::store::ArchiveStore;
use crate::utils::errors::{EngineError, Result};

/// A remote host's archive store, reachable over the remote-shell transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub user: String,
    pub address: String,
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.address)
    }
}

/// Exactly four dot-separated groups, each an integer in [0, 255].
pub fn validate_ipv4(address: &str) -> bool {
    let octets: Vec<&str> = address.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|octet| {
            !octet.is_empty()
                && octet.len() <= 3
                && octet.bytes().all(|b| b.is_ascii_digit())
                && octet.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
        })
}

/// Remote-shell transport capability: probe, exec, and bulk file copy.
/// The production implementation is SSH (`ssh.rs`); tests inject fakes.
pub trait RemoteTransport: Send + Sync + 'static {
    /// Short-lived authenticated connection confirming reachability and
    /// credentials.
    fn probe(&self, endpoint: &RemoteEndpoint) -> impl Future<Output = Result<()>> + Send;

    /// Runs a command over the authenticated session, returning its stdout.
    fn exec(
        &self,
        endpoint: &RemoteEndpoint,
        command: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn push_file(
        &self,
        endpoint: &RemoteEndpoint,
        local: &Path,
        remote: &str,
        observer: Arc<dyn ProgressObserver>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn fetch_file(
        &self,
        endpoint: &RemoteEndpoint,
        remote: &str,
        local: &Path,
        observer: Arc<dyn ProgressObserver>,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub struct TransferEngine<T: RemoteTransport> {
    transport: T,
    journal: Arc<Journal>,
    observer: Arc<dyn ProgressObserver>,
    remote_dir: String,
}

impl<T: RemoteTransport> TransferEngine<T> {
    pub fn new(
        transport: T,
        journal: Arc<Journal>,
        observer: Arc<dyn ProgressObserver>,
        remote_dir: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            journal,
            observer,
            remote_dir: remote_dir.into(),
        }
    }

    async fn preflight(&self, endpoint: &RemoteEndpoint) -> Result<()> {
        if !validate_ipv4(&endpoint.address) {
            return Err(EngineError::Validation(format!(
                "malformed IPv4 address: {:?}",
                endpoint.address
            )));
        }
        match self.transport.probe(endpoint).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.journal
                    .record(&format!("probe of {} failed: {}", endpoint, e));
                Err(match e {
                    EngineError::Connectivity(_) => e,
                    other => EngineError::Connectivity(other.to_string()),
                })
            }
        }
    }

    fn remote_path(&self, name: &str) -> Result<String> {
        if name.is_empty() || name.contains('/') {
            return Err(EngineError::Validation(format!(
                "invalid remote archive name: {:?}",
                name
            )));
        }
        Ok(format!("{}/{}", self.remote_dir.trim_end_matches('/'), name))
    }

    /// Copies `archive` into the remote archive store.
    pub async fn push(&self, archive: &Path, endpoint: &RemoteEndpoint) -> Result<()> {
        self.preflight(endpoint).await?;
        let name = archive
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                EngineError::Validation(format!("unusable archive path: {}", archive.display()))
            })?;
        let remote = self.remote_path(name)?;

        self.journal
            .record(&format!("transfer of {} to {} started", name, endpoint));
        match self
            .transport
            .push_file(endpoint, archive, &remote, Arc::clone(&self.observer))
            .await
        {
            Ok(()) => {
                self.journal
                    .record(&format!("transfer of {} to {} completed", name, endpoint));
                Ok(())
            }
            Err(e) => {
                self.journal.record(&format!(
                    "transfer of {} to {} failed: {}",
                    name, endpoint, e
                ));
                Err(e)
            }
        }
    }

    /// Fetches a remote archive into the local store, returning its local
    /// path.
    pub async fn fetch(
        &self,
        endpoint: &RemoteEndpoint,
        remote_name: &str,
        store: &ArchiveStore,
    ) -> Result<PathBuf> {
        self.preflight(endpoint).await?;
        let remote = self.remote_path(remote_name)?;
        store.ensure_exists()?;
        let local = store.dir().join(remote_name);

        self.journal.record(&format!(
            "fetch of {} from {} started",
            remote_name, endpoint
        ));
        match self
            .transport
            .fetch_file(endpoint, &remote, &local, Arc::clone(&self.observer))
            .await
        {
            Ok(()) => {
                self.journal.record(&format!(
                    "fetch of {} from {} completed",
                    remote_name, endpoint
                ));
                Ok(local)
            }
            Err(e) => {
                self.journal.record(&format!(
                    "fetch of {} from {} failed: {}",
                    remote_name, endpoint, e
                ));
                Err(e)
            }
        }
    }

    /// Lists archive files in the remote store. An empty listing is a valid
    /// result; a failed session or command is an error.
    pub async fn list_remote(&self, endpoint: &RemoteEndpoint) -> Result<Vec<String>> {
        self.preflight(endpoint).await?;
        let command = format!("ls -1 -- {}", shell_quote(&self.remote_dir));
        let stdout = self.transport.exec(endpoint, &command).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| line.ends_with(".tar.gz"))
            .map(String::from)
            .collect())
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
