//! SSH implementation of the remote transport.
//!
//! libssh2 is a blocking library, so every operation runs on the blocking
//! thread pool. Bulk copies stream over SFTP in fixed chunks with progress
//! reports; a copy interrupted earlier resumes from the receiver's current
//! size, and a file already present with a matching size is skipped.

use ssh2::{OpenFlags, OpenType, Session};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{RemoteEndpoint, RemoteTransport};
use crate::progress::ProgressObserver;
use crate::utils::errors::{EngineError, Result};

const COPY_CHUNK: usize = 128 * 1024;

#[derive(Debug, Clone)]
pub struct SshTransport {
    port: u16,
    identity_file: Option<PathBuf>,
    connect_timeout: Duration,
}

impl SshTransport {
    pub fn new(port: u16, identity_file: Option<PathBuf>, connect_timeout: Duration) -> Self {
        Self {
            port,
            identity_file,
            connect_timeout,
        }
    }

    fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Session> {
        let addr: SocketAddr = format!("{}:{}", endpoint.address, self.port)
            .parse()
            .map_err(|e| EngineError::Validation(format!("bad endpoint address: {e}")))?;
        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| EngineError::Connectivity(format!("connect to {} failed: {}", addr, e)))?;

        let mut session =
            Session::new().map_err(|e| EngineError::Connectivity(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| EngineError::Connectivity(format!("ssh handshake failed: {e}")))?;

        match &self.identity_file {
            Some(identity) => session
                .userauth_pubkey_file(&endpoint.user, None, identity, None)
                .map_err(|e| EngineError::Connectivity(format!("ssh key auth failed: {e}")))?,
            None => session
                .userauth_agent(&endpoint.user)
                .map_err(|e| EngineError::Connectivity(format!("ssh agent auth failed: {e}")))?,
        }
        if !session.authenticated() {
            return Err(EngineError::Connectivity(format!(
                "authentication as {} rejected",
                endpoint.user
            )));
        }
        Ok(session)
    }
}

fn join_error(e: tokio::task::JoinError) -> EngineError {
    EngineError::Stream(format!("transport task failed: {e}"))
}

fn exec_blocking(transport: &SshTransport, endpoint: &RemoteEndpoint, command: &str) -> Result<String> {
    let session = transport.connect(endpoint)?;
    let mut channel = session
        .channel_session()
        .map_err(|e| EngineError::Connectivity(format!("ssh channel failed: {e}")))?;
    channel
        .exec(command)
        .map_err(|e| EngineError::Stream(format!("remote command failed to start: {e}")))?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|e| EngineError::Stream(format!("remote command read failed: {e}")))?;
    let mut stderr = String::new();
    let _ = channel.stderr().read_to_string(&mut stderr);
    channel
        .wait_close()
        .map_err(|e| EngineError::Stream(format!("remote command close failed: {e}")))?;

    let status = channel
        .exit_status()
        .map_err(|e| EngineError::Stream(format!("remote command status unknown: {e}")))?;
    if status != 0 {
        return Err(EngineError::Stream(format!(
            "remote command {:?} exited with {}: {}",
            command,
            status,
            stderr.trim()
        )));
    }
    Ok(stdout)
}

fn push_blocking(
    transport: &SshTransport,
    endpoint: &RemoteEndpoint,
    local: &Path,
    remote: &str,
    observer: &dyn ProgressObserver,
) -> Result<()> {
    let session = transport.connect(endpoint)?;
    let sftp = session
        .sftp()
        .map_err(|e| EngineError::Connectivity(format!("sftp subsystem failed: {e}")))?;

    let mut src = std::fs::File::open(local)?;
    let total = src.metadata()?.len();
    let label = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| local.display().to_string());

    // Skip complete copies, resume partial ones.
    let offset = match sftp.stat(Path::new(remote)) {
        Ok(stat) => stat.size.unwrap_or(0).min(total),
        Err(_) => 0,
    };
    if offset == total && total > 0 {
        debug!("{} already present remotely with matching size, skipping", remote);
        observer.report(&label, total, Some(total));
        return Ok(());
    }

    let mut dst = sftp
        .open_mode(
            Path::new(remote),
            OpenFlags::WRITE | OpenFlags::CREATE,
            0o644,
            OpenType::File,
        )
        .map_err(|e| EngineError::Stream(format!("remote open of {} failed: {}", remote, e)))?;
    if offset > 0 {
        info!("resuming transfer of {} at byte {}", label, offset);
        src.seek(SeekFrom::Start(offset))?;
        dst.seek(SeekFrom::Start(offset))
            .map_err(|e| EngineError::Stream(format!("remote seek failed: {e}")))?;
    }

    let mut done = offset;
    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])
            .map_err(|e| EngineError::Stream(format!("remote write failed: {e}")))?;
        done += n as u64;
        observer.report(&label, done, Some(total));
    }
    Ok(())
}

fn fetch_blocking(
    transport: &SshTransport,
    endpoint: &RemoteEndpoint,
    remote: &str,
    local: &Path,
    observer: &dyn ProgressObserver,
) -> Result<()> {
    let session = transport.connect(endpoint)?;
    let sftp = session
        .sftp()
        .map_err(|e| EngineError::Connectivity(format!("sftp subsystem failed: {e}")))?;

    let stat = sftp
        .stat(Path::new(remote))
        .map_err(|e| EngineError::Stream(format!("remote archive {} unavailable: {}", remote, e)))?;
    let total = stat.size;
    let label = Path::new(remote)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| remote.to_string());

    let mut src = sftp
        .open(Path::new(remote))
        .map_err(|e| EngineError::Stream(format!("remote open of {} failed: {}", remote, e)))?;

    // Download into a partial file, resume it if a previous fetch stopped
    // short, and rename only once the copy is complete.
    let partial = partial_path(local);
    let offset = match std::fs::metadata(&partial) {
        Ok(meta) => total.map_or(0, |t| meta.len().min(t)),
        Err(_) => 0,
    };
    let mut dst = if offset > 0 {
        info!("resuming fetch of {} at byte {}", label, offset);
        src.seek(SeekFrom::Start(offset))
            .map_err(|e| EngineError::Stream(format!("remote seek failed: {e}")))?;
        let mut f = std::fs::OpenOptions::new().write(true).open(&partial)?;
        f.seek(SeekFrom::Start(offset))?;
        f
    } else {
        std::fs::File::create(&partial)?
    };

    let mut done = offset;
    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        let n = src
            .read(&mut buf)
            .map_err(|e| EngineError::Stream(format!("remote read failed: {e}")))?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])?;
        done += n as u64;
        observer.report(&label, done, total);
    }
    dst.flush()?;
    drop(dst);

    std::fs::rename(&partial, local)?;
    Ok(())
}

fn partial_path(local: &Path) -> PathBuf {
    let mut name = local
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    local.with_file_name(name)
}

impl RemoteTransport for SshTransport {
    async fn probe(&self, endpoint: &RemoteEndpoint) -> Result<()> {
        let transport = self.clone();
        let endpoint = endpoint.clone();
        let result = tokio::task::spawn_blocking(move || transport.connect(&endpoint).map(drop))
            .await
            .map_err(join_error)?;
        result
    }

    async fn exec(&self, endpoint: &RemoteEndpoint, command: &str) -> Result<String> {
        let transport = self.clone();
        let endpoint = endpoint.clone();
        let command = command.to_string();
        tokio::task::spawn_blocking(move || exec_blocking(&transport, &endpoint, &command))
            .await
            .map_err(join_error)?
    }

    async fn push_file(
        &self,
        endpoint: &RemoteEndpoint,
        local: &Path,
        remote: &str,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<()> {
        let transport = self.clone();
        let endpoint = endpoint.clone();
        let local = local.to_path_buf();
        let remote = remote.to_string();
        tokio::task::spawn_blocking(move || {
            push_blocking(&transport, &endpoint, &local, &remote, observer.as_ref())
        })
        .await
        .map_err(join_error)?
    }

    async fn fetch_file(
        &self,
        endpoint: &RemoteEndpoint,
        remote: &str,
        local: &Path,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<()> {
        let transport = self.clone();
        let endpoint = endpoint.clone();
        let remote = remote.to_string();
        let local = local.to_path_buf();
        tokio::task::spawn_blocking(move || {
            fetch_blocking(&transport, &endpoint, &remote, &local, observer.as_ref())
        })
        .await
        .map_err(join_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/store/data-host1-20260807T120000.tar.gz")),
            PathBuf::from("/store/data-host1-20260807T120000.tar.gz.partial")
        );
    }

    #[test]
    fn test_unreachable_endpoint_is_connectivity_error() {
        // TEST-NET-1 address, nothing listens there
        let transport = SshTransport::new(22, None, Duration::from_millis(200));
        let endpoint = RemoteEndpoint {
            user: "backup".to_string(),
            address: "192.0.2.1".to_string(),
        };
        let result = transport.connect(&endpoint);
        assert!(matches!(result, Err(EngineError::Connectivity(_))));
    }
}
