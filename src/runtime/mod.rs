//! Volume runtime capability.
//!
//! The engine drives volumes through this narrow interface so its logic can
//! run against fakes in tests; the production implementation shells out to
//! the container CLI (`docker.rs`). Volume content moves as uncompressed
//! tar streams — the runtime serializes/deserializes the tree, the engine
//! owns compression and archiving.

pub mod docker;

use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::utils::errors::Result;

pub trait VolumeRuntime: Send + Sync + 'static {
    /// Confirms the runtime is present and answering.
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    fn list_volumes(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Read-only size probe. `None` means unknown; callers fall back to an
    /// un-sized progress indicator.
    fn measure_volume_size(&self, name: &str) -> impl Future<Output = Result<Option<u64>>> + Send;

    /// Streams the volume's content tree as a tar stream into `sink`,
    /// resolving with the bytes written once the stream has terminated
    /// successfully.
    fn read_volume_tree(
        &self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Replaces the volume's contents with the tree read from `source`
    /// (a tar stream).
    fn write_volume_tree(
        &self,
        name: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> impl Future<Output = Result<()>> + Send;
}
