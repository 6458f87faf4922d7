//! Container CLI implementation of the volume runtime.
//!
//! Every operation shells out to the runtime binary. Volume contents are
//! serialized by `tar` running in a short-lived helper container with the
//! volume mounted; the size probe runs `du` the same way.

use serde::Deserialize;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, warn};

use super::VolumeRuntime;
use crate::config::RuntimeConfig;
use crate::utils::errors::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    helper_image: String,
}

#[derive(Debug, Deserialize)]
struct VolumeRecord {
    #[serde(rename = "Name")]
    name: String,
}

impl DockerCli {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            helper_image: config.helper_image.clone(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self
            .command(args)
            .output()
            .await
            .map_err(|e| spawn_error(&self.binary, e))?;
        if !output.status.success() {
            return Err(EngineError::Stream(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn spawn_error(binary: &str, e: std::io::Error) -> EngineError {
    if e.kind() == std::io::ErrorKind::NotFound {
        EngineError::Dependency(format!("{} not found in PATH", binary))
    } else {
        EngineError::Io(e)
    }
}

async fn drain_stderr(stderr: Option<ChildStderr>) -> String {
    let mut buf = String::new();
    if let Some(mut stderr) = stderr {
        let _ = stderr.read_to_string(&mut buf).await;
    }
    buf
}

impl VolumeRuntime for DockerCli {
    async fn ping(&self) -> Result<()> {
        match self
            .run_capture(&["version", "--format", "{{.Server.Version}}"])
            .await
        {
            Ok(version) => {
                debug!("runtime answering, server version {}", version.trim());
                Ok(())
            }
            Err(EngineError::Stream(detail)) => Err(EngineError::Dependency(format!(
                "{} is installed but not answering: {}",
                self.binary, detail
            ))),
            Err(e) => Err(e),
        }
    }

    async fn list_volumes(&self) -> Result<Vec<String>> {
        let stdout = self
            .run_capture(&["volume", "ls", "--format", "json"])
            .await?;
        let mut names = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let record: VolumeRecord = serde_json::from_str(line)
                .map_err(|e| EngineError::Stream(format!("unparseable volume listing: {e}")))?;
            names.push(record.name);
        }
        Ok(names)
    }

    async fn measure_volume_size(&self, name: &str) -> Result<Option<u64>> {
        let mount = format!("{}:/data:ro", name);
        let result = self
            .run_capture(&[
                "run",
                "--rm",
                "-v",
                mount.as_str(),
                self.helper_image.as_str(),
                "du",
                "-sk",
                "/data",
            ])
            .await;

        match result {
            Ok(stdout) => {
                let kib = stdout
                    .split_whitespace()
                    .next()
                    .and_then(|field| field.parse::<u64>().ok());
                Ok(kib.map(|k| k * 1024).filter(|bytes| *bytes > 0))
            }
            Err(EngineError::Dependency(detail)) => Err(EngineError::Dependency(detail)),
            Err(e) => {
                // advisory probe: degrade to an un-sized progress indicator
                warn!("size probe for volume {} failed: {}", name, e);
                Ok(None)
            }
        }
    }

    async fn read_volume_tree(
        &self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let mount = format!("{}:/data:ro", name);
        let mut child = self
            .command(&[
                "run",
                "--rm",
                "-v",
                mount.as_str(),
                self.helper_image.as_str(),
                "tar",
                "-cf",
                "-",
                "-C",
                "/data",
                ".",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(&self.binary, e))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Stream("no stdout from runtime".into()))?;
        let stderr_task = tokio::spawn(drain_stderr(child.stderr.take()));

        let copied = tokio::io::copy(&mut stdout, sink).await;
        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        let copied =
            copied.map_err(|e| EngineError::Stream(format!("volume read stream failed: {e}")))?;
        if !status.success() {
            return Err(EngineError::Stream(format!(
                "export of volume {} exited with {}: {}",
                name,
                status,
                stderr.trim()
            )));
        }
        debug!("exported {} bytes from volume {}", copied, name);
        Ok(copied)
    }

    async fn write_volume_tree(
        &self,
        name: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        let mount = format!("{}:/data", name);
        let mut child = self
            .command(&[
                "run",
                "--rm",
                "-i",
                "-v",
                mount.as_str(),
                self.helper_image.as_str(),
                "sh",
                "-c",
                "find /data -mindepth 1 -delete && tar -xf - -C /data",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(&self.binary, e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Stream("no stdin to runtime".into()))?;
        let stderr_task = tokio::spawn(drain_stderr(child.stderr.take()));

        let copied = tokio::io::copy(source, &mut stdin).await;
        let shutdown = stdin.shutdown().await;
        drop(stdin);

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(EngineError::Stream(format!(
                "import into volume {} exited with {}: {}",
                name,
                status,
                stderr.trim()
            )));
        }
        copied.map_err(|e| EngineError::Stream(format!("volume write stream failed: {e}")))?;
        shutdown.map_err(|e| EngineError::Stream(format!("volume write stream failed: {e}")))?;
        Ok(())
    }
}
