//! Progress reporting for streaming operations.
//!
//! Streams are wrapped in counting adapters that feed an observer at a
//! bounded rate, with a final report when the stream ends. A `None` total
//! means the size probe failed and the operation runs un-sized.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Duration, Instant};

/// Observer fed byte counts as a stream flows.
pub trait ProgressObserver: Send + Sync {
    fn report(&self, label: &str, done: u64, total: Option<u64>);
}

/// Observer that discards all reports.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn report(&self, _label: &str, _done: u64, _total: Option<u64>) {}
}

/// Reports are throttled to 4 per second per stream.
const UPDATE_INTERVAL: Duration = Duration::from_millis(250);

/// Wraps an `AsyncRead`, counting bytes as they are pulled through.
pub struct CountingReader<R> {
    inner: R,
    label: String,
    total: Option<u64>,
    bytes: u64,
    last_update: Instant,
    observer: Arc<dyn ProgressObserver>,
}

impl<R: AsyncRead + Unpin> CountingReader<R> {
    pub fn new(inner: R, label: &str, total: Option<u64>, observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            inner,
            label: label.to_string(),
            total,
            bytes: 0,
            last_update: Instant::now(),
            observer,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let chunk = (buf.filled().len() - before) as u64;
                this.bytes += chunk;
                if chunk == 0 {
                    // EOF: final report
                    this.observer.report(&this.label, this.bytes, this.total);
                } else if this.last_update.elapsed() >= UPDATE_INTERVAL {
                    this.last_update = Instant::now();
                    this.observer.report(&this.label, this.bytes, this.total);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Wraps an `AsyncWrite`, counting bytes as they are pushed through.
pub struct CountingWriter<W> {
    inner: W,
    label: String,
    total: Option<u64>,
    bytes: u64,
    last_update: Instant,
    observer: Arc<dyn ProgressObserver>,
}

impl<W: AsyncWrite + Unpin> CountingWriter<W> {
    pub fn new(inner: W, label: &str, total: Option<u64>, observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            inner,
            label: label.to_string(),
            total,
            bytes: 0,
            last_update: Instant::now(),
            observer,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                this.bytes += written as u64;
                if this.last_update.elapsed() >= UPDATE_INTERVAL {
                    this.last_update = Instant::now();
                    this.observer.report(&this.label, this.bytes, this.total);
                }
                Poll::Ready(Ok(written))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_shutdown(cx) {
            Poll::Ready(Ok(())) => {
                // final report once the stream is fully flushed
                this.observer.report(&this.label, this.bytes, this.total);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
