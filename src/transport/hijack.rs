//! Hijacked connections.
//!
//! After a `101 Switching Protocols` response the HTTP client may already
//! have read bytes past the response head. [`HijackedConn`] hands those out
//! first, then reads straight from the socket.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};

use super::dial::{BoxedConnection, Connection};
use crate::error::{DockerError, Result};

// Fallback when the upgraded I/O cannot be unwrapped; hyper's wrapper
// cannot half-close.
impl Connection for TokioIo<Upgraded> {}

/// A raw duplex stream taken over from an HTTP connection.
pub struct HijackedConn {
    conn: BoxedConnection,
    /// Read-ahead from the HTTP layer, replayed before socket reads.
    buffered: Bytes,
    close_write: bool,
}

impl HijackedConn {
    /// Wrap a connection and the bytes already read from it.
    pub fn new(conn: BoxedConnection, buffered: Bytes) -> Self {
        let close_write = conn.supports_close_write();
        Self {
            conn,
            buffered,
            close_write,
        }
    }

    /// Read-ahead bytes not yet returned.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// True if [`close_write`](Self::close_write) can half-close.
    pub fn supports_close_write(&self) -> bool {
        self.close_write
    }

    /// Close the write direction, leaving reads open.
    ///
    /// Fails with [`DockerError::Unsupported`] if the underlying transport
    /// cannot half-close.
    pub async fn close_write(&mut self) -> Result<()> {
        if !self.close_write {
            return Err(DockerError::Unsupported("half-close on this connection"));
        }
        self.shutdown().await?;
        Ok(())
    }

    /// Split into independently owned read and write halves.
    pub fn into_split(self) -> (HijackedReader, HijackedWriter) {
        let close_write = self.close_write;
        let (read, write) = tokio::io::split(self);
        (
            HijackedReader { inner: read },
            HijackedWriter {
                inner: write,
                close_write,
            },
        )
    }
}

impl Connection for HijackedConn {
    fn supports_close_write(&self) -> bool {
        self.close_write
    }
}

impl std::fmt::Debug for HijackedConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HijackedConn")
            .field("buffered", &self.buffered.len())
            .field("close_write", &self.close_write)
            .finish()
    }
}

impl AsyncRead for HijackedConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.buffered.is_empty() {
            let n = buf.remaining().min(self.buffered.len());
            let chunk = self.buffered.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.conn).poll_read(cx, buf)
    }
}

impl AsyncWrite for HijackedConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.conn).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.conn).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.conn.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.conn).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.conn).poll_shutdown(cx)
    }
}

/// Read half of a [`HijackedConn`].
pub struct HijackedReader {
    inner: ReadHalf<HijackedConn>,
}

impl AsyncRead for HijackedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Write half of a [`HijackedConn`].
///
/// Dropping it does not close anything; the socket closes once both
/// halves are gone.
pub struct HijackedWriter {
    inner: WriteHalf<HijackedConn>,
    close_write: bool,
}

impl HijackedWriter {
    pub fn supports_close_write(&self) -> bool {
        self.close_write
    }

    /// Close the write direction (stdin EOF for the container).
    pub async fn close_write(&mut self) -> Result<()> {
        if !self.close_write {
            return Err(DockerError::Unsupported("half-close on this connection"));
        }
        self.inner.shutdown().await?;
        Ok(())
    }
}

impl AsyncWrite for HijackedWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
