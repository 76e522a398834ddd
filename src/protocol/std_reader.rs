//! Frame-by-frame reader for multiplexed stdio streams.
//!
//! Implements a state machine over any `AsyncRead` source:
//! - `Ready`: at a frame boundary, `next()` reads the next header
//! - `Frame`: header parsed, `read()` drains the remaining payload
//! - `Eof`: the source ended cleanly between frames
//! - `Failed`: a terminal error; every later call returns it again
//!
//! # Example
//!
//! ```ignore
//! use dockwire_client::protocol::StdReader;
//!
//! let mut reader = StdReader::new(conn);
//! let mut buf = [0u8; 4096];
//! while let Some(header) = reader.next().await? {
//!     loop {
//!         let n = reader.read(&mut buf).await?;
//!         if n == 0 {
//!             break;
//!         }
//!         println!("{}: {:?}", header.descriptor, &buf[..n]);
//!     }
//! }
//! ```

use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use super::wire_format::{StdHeader, HEADER_SIZE};
use crate::error::StreamError;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// At a frame boundary (possibly part way through a header).
    Ready,
    /// Header parsed, `remaining` payload bytes not yet delivered.
    Frame { header: StdHeader, remaining: u32 },
    /// Source ended cleanly.
    Eof,
    /// Terminal error.
    Failed(StreamError),
}

/// Reads a multiplexed stdio stream one frame at a time.
///
/// The declared frame length is never used to size an allocation; payload
/// bytes are handed to the caller's buffer as they arrive.
pub struct StdReader<R> {
    inner: R,
    state: State,
    /// Header bytes gathered so far while in `Ready`.
    header_buf: [u8; HEADER_SIZE],
    header_filled: usize,
    /// Bytes consumed from `inner`.
    offset: u64,
}

impl<R> StdReader<R> {
    /// Wrap a source positioned at a frame boundary.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: State::Ready,
            header_buf: [0u8; HEADER_SIZE],
            header_filled: 0,
            offset: 0,
        }
    }

    /// Bytes consumed from the underlying source so far.
    #[inline]
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Payload bytes of the current frame not yet read.
    #[inline]
    pub fn remaining(&self) -> u32 {
        match self.state {
            State::Frame { remaining, .. } => remaining,
            _ => 0,
        }
    }

    /// Header of the frame currently being read, if any.
    pub fn current(&self) -> Option<StdHeader> {
        match self.state {
            State::Frame { header, .. } => Some(header),
            _ => None,
        }
    }

    /// True once the source has ended cleanly.
    pub fn is_eof(&self) -> bool {
        matches!(self.state, State::Eof)
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fail(&mut self, err: StreamError) -> StreamError {
        self.state = State::Failed(err.clone());
        err
    }

    fn io_error(&mut self, err: io::Error) -> StreamError {
        let offset = self.offset;
        self.fail(StreamError::Io {
            offset,
            source: Arc::new(err),
        })
    }
}

impl<R: AsyncRead + Unpin> StdReader<R> {
    /// Advance to the next frame and return its header.
    ///
    /// Returns `Ok(None)` when the source ends at a frame boundary. Fails
    /// with [`StreamError::Conflict`] (without changing state) if the current
    /// payload has not been fully read.
    pub async fn next(&mut self) -> Result<Option<StdHeader>, StreamError> {
        poll_fn(|cx| self.poll_next_header(cx)).await
    }

    /// Read payload bytes of the current frame into `buf`.
    ///
    /// Returns `Ok(0)` at the end of the frame (and before the first
    /// `next()`); this is the end of the frame, not the end of the stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut read_buf = ReadBuf::new(buf);
        poll_fn(|cx| self.poll_read_payload(cx, &mut read_buf)).await?;
        Ok(read_buf.filled().len())
    }

    /// Poll form of [`next`](Self::next).
    pub fn poll_next_header(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<StdHeader>, StreamError>> {
        match &self.state {
            State::Ready => {}
            State::Frame { .. } => return Poll::Ready(Err(StreamError::Conflict)),
            State::Eof => return Poll::Ready(Ok(None)),
            State::Failed(err) => return Poll::Ready(Err(err.clone())),
        }

        while self.header_filled < HEADER_SIZE {
            let mut read_buf = ReadBuf::new(&mut self.header_buf[self.header_filled..]);
            match ready!(Pin::new(&mut self.inner).poll_read(cx, &mut read_buf)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Poll::Ready(Err(self.io_error(e))),
            }

            let n = read_buf.filled().len();
            if n == 0 {
                if self.header_filled == 0 {
                    self.state = State::Eof;
                    return Poll::Ready(Ok(None));
                }
                let err = StreamError::TruncatedHeader {
                    read: self.header_filled,
                    offset: self.offset - self.header_filled as u64,
                };
                return Poll::Ready(Err(self.fail(err)));
            }
            self.header_filled += n;
            self.offset += n as u64;
        }

        self.header_filled = 0;
        let frame_start = self.offset - HEADER_SIZE as u64;
        match StdHeader::decode(&self.header_buf) {
            Ok(header) => {
                self.state = if header.is_empty() {
                    State::Ready
                } else {
                    State::Frame {
                        header,
                        remaining: header.size,
                    }
                };
                Poll::Ready(Ok(Some(header)))
            }
            Err(descriptor) => {
                tracing::debug!(descriptor, offset = frame_start, "invalid stream descriptor");
                Poll::Ready(Err(self.fail(StreamError::UnknownDescriptor {
                    descriptor,
                    offset: frame_start,
                })))
            }
        }
    }

    /// Poll form of [`read`](Self::read).
    ///
    /// Fills at most `min(buf.remaining(), remaining payload)` bytes.
    pub fn poll_read_payload(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<Result<(), StreamError>> {
        let (header, remaining) = match &self.state {
            State::Frame { header, remaining } => (*header, *remaining),
            State::Ready | State::Eof => return Poll::Ready(Ok(())),
            State::Failed(err) => return Poll::Ready(Err(err.clone())),
        };
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let max = buf.remaining().min(remaining as usize);
        let n = loop {
            let mut limited = ReadBuf::new(buf.initialize_unfilled_to(max));
            match ready!(Pin::new(&mut self.inner).poll_read(cx, &mut limited)) {
                Ok(()) => break limited.filled().len(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Poll::Ready(Err(self.io_error(e))),
            }
        };

        if n == 0 {
            let err = StreamError::TruncatedPayload {
                read: header.size - remaining,
                expected: header.size,
                offset: self.offset,
            };
            return Poll::Ready(Err(self.fail(err)));
        }

        buf.advance(n);
        self.offset += n as u64;
        // n <= remaining, which fits in u32.
        let remaining = remaining - n as u32;
        self.state = if remaining == 0 {
            State::Ready
        } else {
            State::Frame { header, remaining }
        };
        Poll::Ready(Ok(()))
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for StdReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut()
            .poll_read_payload(cx, buf)
            .map_err(io::Error::from)
    }
}

#[cfg(test)]
impl<R> StdReader<R> {
    fn state_name(&self) -> &'static str {
        match self.state {
            State::Ready => "Ready",
            State::Frame { .. } => "Frame",
            State::Eof => "Eof",
            State::Failed(_) => "Failed",
        }
    }
}
