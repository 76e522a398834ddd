//! Bounded in-process byte pipes.
//!
//! The attach pump writes demultiplexed output into a [`PipeWriter`]; the
//! caller reads it from the matching [`PipeReader`] on its own task.
//!
//! - Dropping the writer is EOF for the reader.
//! - [`PipeWriter::close_with_error`] ends the stream with an error that the
//!   reader returns on every later read, after the queued data. It never
//!   waits for capacity.
//! - Dropping the reader makes later writes fail with `BrokenPipe`.
//! - Writes wait while `capacity` chunks are queued.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{ready, Context, Poll};

use bytes::{Buf, Bytes};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

use crate::error::DockerError;

/// Default number of chunks a pipe holds before writers wait.
pub const DEFAULT_PIPE_CAPACITY: usize = 16;

/// Error the writer closed the pipe with.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PipeError(Arc<DockerError>);

impl PipeError {
    pub fn new(err: DockerError) -> Self {
        Self(Arc::new(err))
    }

    /// True if both values share the same underlying error.
    pub fn same_as(&self, other: &PipeError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The underlying error.
    pub fn error(&self) -> &DockerError {
        &self.0
    }
}

impl From<DockerError> for PipeError {
    fn from(err: DockerError) -> Self {
        Self::new(err)
    }
}

/// Create a pipe holding at most `capacity` unread chunks.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let failure = Arc::new(OnceLock::new());
    (
        PipeWriter {
            tx: PollSender::new(tx),
            failure: failure.clone(),
        },
        PipeReader {
            rx,
            current: Bytes::new(),
            failure,
            error: None,
        },
    )
}

/// Write end of a pipe.
pub struct PipeWriter {
    tx: PollSender<Bytes>,
    // Set before the sender is dropped, read once the channel is drained.
    failure: Arc<OnceLock<PipeError>>,
}

impl PipeWriter {
    /// Close the pipe so the reader fails with `err` after draining.
    pub fn close_with_error(mut self, err: impl Into<PipeError>) {
        let _ = self.failure.set(err.into());
        self.tx.close();
    }

    /// True once the reader has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.get_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let broken = || io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed");

        ready!(self.tx.poll_reserve(cx)).map_err(|_| broken())?;
        self.tx
            .send_item(Bytes::copy_from_slice(buf))
            .map_err(|_| broken())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx.close();
        Poll::Ready(Ok(()))
    }
}

/// Read end of a pipe.
pub struct PipeReader {
    rx: mpsc::Receiver<Bytes>,
    current: Bytes,
    failure: Arc<OnceLock<PipeError>>,
    error: Option<PipeError>,
}

impl PipeReader {
    /// Next chunk as written, or `None` at EOF.
    pub async fn recv(&mut self) -> Option<Result<Bytes, PipeError>> {
        if !self.current.is_empty() {
            return Some(Ok(std::mem::take(&mut self.current)));
        }
        if let Some(err) = &self.error {
            return Some(Err(err.clone()));
        }
        match self.rx.recv().await {
            Some(chunk) => Some(Ok(chunk)),
            None => self.closed().map(Err),
        }
    }

    /// Called once the channel is drained and every writer is gone.
    fn closed(&mut self) -> Option<PipeError> {
        let err = self.failure.get().cloned()?;
        self.error = Some(err.clone());
        Some(err)
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.current.is_empty() {
                let n = buf.remaining().min(self.current.len());
                buf.put_slice(&self.current[..n]);
                self.current.advance(n);
                return Poll::Ready(Ok(()));
            }
            if let Some(err) = &self.error {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, err.clone())));
            }
            match ready!(self.rx.poll_recv(cx)) {
                Some(chunk) => self.current = chunk,
                None => {
                    if self.closed().is_none() {
                        return Poll::Ready(Ok(()));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_write_then_read() {
        let (mut writer, mut reader) = pipe(4);
        writer.write_all(b"hello ").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        drop(writer);

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn test_close_with_error_is_sticky() {
        let (mut writer, mut reader) = pipe(4);
        writer.write_all(b"partial").await.unwrap();
        writer.close_with_error(DockerError::Remote("boom".to_string()));

        let mut buf = [0u8; 32];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"partial");

        for _ in 0..2 {
            let err = reader.read(&mut buf).await.unwrap_err();
            assert!(err.to_string().contains("boom"));
        }
        assert!(reader.recv().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_close_with_error_on_full_pipe_does_not_wait() {
        let (mut writer, mut reader) = pipe(1);
        writer.write_all(b"queued").await.unwrap();

        // Returns at once even though the only slot is taken.
        writer.close_with_error(DockerError::Cancelled);

        assert_eq!(reader.recv().await.unwrap().unwrap(), Bytes::from_static(b"queued"));
        let err = reader.recv().await.unwrap().unwrap_err();
        assert!(matches!(err.error(), DockerError::Cancelled));

        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_plain_drop_is_eof() {
        let (writer, mut reader) = pipe(1);
        drop(writer);
        assert!(reader.recv().await.is_none());
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_reader_breaks_writes() {
        let (mut writer, reader) = pipe(1);
        drop(reader);
        assert!(writer.is_closed());
        let err = writer.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_writer_waits_for_capacity() {
        let (mut writer, mut reader) = pipe(1);
        writer.write_all(b"one").await.unwrap();

        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            writer.write_all(b"two"),
        )
        .await;
        assert!(blocked.is_err(), "second write should wait for the reader");

        assert_eq!(reader.recv().await.unwrap().unwrap(), Bytes::from_static(b"one"));
        writer.write_all(b"two").await.unwrap();
        assert_eq!(reader.recv().await.unwrap().unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_small_reads_split_chunks() {
        let (mut writer, mut reader) = pipe(2);
        writer.write_all(b"abcdef").await.unwrap();
        drop(writer);

        let mut buf = [0u8; 4];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ef");
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }
}
