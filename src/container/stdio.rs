//! Stream wiring for attach and exec sessions.
//!
//! A hijacked connection is split in two. The write half becomes the
//! caller's stdin. The read half is pumped by a background task into one
//! pipe per requested output stream.
//!
//! An undrained pipe stalls the pump, so stdout stops too if nobody reads a
//! requested stderr.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, Sink};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{DockerError, Result};
use crate::pipe::{pipe, PipeError, PipeReader, PipeWriter};
use crate::protocol::std_copy;
use crate::transport::{HijackedConn, HijackedReader, HijackedWriter};

/// Which streams a session carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Streams {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

/// Live attach or exec session.
///
/// Take the streams you need, then [`wait`](Self::wait) for the output to
/// end. Keep the value alive while reading: dropping it cancels the pump,
/// taken output readers then fail with [`DockerError::Cancelled`], and the
/// connection closes once the stdin writer is gone too.
pub struct AttachIo {
    stdin: Option<HijackedWriter>,
    stdout: Option<PipeReader>,
    stderr: Option<PipeReader>,
    tty: bool,
    cancel: CancellationToken,
    pump: Option<JoinHandle<Result<u64>>>,
}

impl AttachIo {
    /// Split `conn` and start pumping its output.
    ///
    /// In TTY mode the stream is raw and all of it goes to stdout; there is
    /// no stderr pipe.
    pub(crate) fn start(conn: HijackedConn, streams: Streams, tty: bool, capacity: usize) -> Self {
        let (reader, writer) = conn.into_split();

        let (stdout_tx, stdout_rx) = open_pipe(streams.stdout, capacity);
        let (stderr_tx, stderr_rx) = open_pipe(streams.stderr && !tty, capacity);

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(run_pump(
            reader,
            StreamSink::new(stdout_tx),
            StreamSink::new(stderr_tx),
            tty,
            cancel.clone(),
        ));

        Self {
            stdin: streams.stdin.then_some(writer),
            stdout: stdout_rx,
            stderr: stderr_rx,
            tty,
            cancel,
            pump: Some(pump),
        }
    }

    /// True if the session has a terminal; output is then not multiplexed.
    pub fn is_tty(&self) -> bool {
        self.tty
    }

    pub fn stdin(&mut self) -> Option<&mut HijackedWriter> {
        self.stdin.as_mut()
    }

    pub fn take_stdin(&mut self) -> Option<HijackedWriter> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<PipeReader> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<PipeReader> {
        self.stderr.take()
    }

    /// Copy `reader` to the container's stdin, then half-close it.
    ///
    /// Returns the bytes copied. If the connection cannot half-close, stdin
    /// stays open and only a debug message is logged.
    pub async fn copy_stdin_from<R>(&mut self, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| DockerError::InvalidInput("stdin is not attached".to_string()))?;

        let copied = tokio::io::copy(reader, stdin).await?;
        stdin.flush().await?;
        match stdin.close_write().await {
            Ok(()) => {}
            Err(DockerError::Unsupported(what)) => {
                tracing::debug!(what, "stdin left open after copy");
            }
            Err(e) => return Err(e),
        }
        Ok(copied)
    }

    /// Wait for the output stream to end.
    ///
    /// Returns the bytes the pump delivered. A failed stream returns the
    /// same error the output pipes were closed with.
    pub async fn wait(mut self) -> Result<u64> {
        match self.pump.take() {
            Some(pump) => join_pump(pump).await,
            None => Ok(0),
        }
    }

    /// Cancel the pump and drop the connection.
    ///
    /// Pipe readers get the data already queued, then fail with
    /// [`DockerError::Cancelled`]. Only a stream the daemon ended is EOF.
    pub async fn close(mut self) {
        self.cancel.cancel();
        self.stdin = None;
        if let Some(pump) = self.pump.take() {
            if let Err(e) = join_pump(pump).await {
                tracing::debug!(error = %e, "attach pump ended during close");
            }
        }
    }
}

impl Drop for AttachIo {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for AttachIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachIo")
            .field("tty", &self.tty)
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

fn open_pipe(wanted: bool, capacity: usize) -> (Option<PipeWriter>, Option<PipeReader>) {
    if wanted {
        let (tx, rx) = pipe(capacity);
        (Some(tx), Some(rx))
    } else {
        (None, None)
    }
}

async fn join_pump(pump: JoinHandle<Result<u64>>) -> Result<u64> {
    pump.await
        .map_err(|e| DockerError::Io(io::Error::new(io::ErrorKind::Other, e)))?
}

async fn run_pump(
    mut reader: HijackedReader,
    mut stdout: StreamSink,
    mut stderr: StreamSink,
    tty: bool,
    cancel: CancellationToken,
) -> Result<u64> {
    let result = tokio::select! {
        res = copy_output(&mut reader, &mut stdout, &mut stderr, tty) => res,
        _ = cancel.cancelled() => Err(DockerError::Cancelled),
    };

    match result {
        Ok(written) => {
            tracing::debug!(written, tty, "attach stream ended");
            Ok(written)
        }
        Err(DockerError::Cancelled) => {
            tracing::debug!("attach pump cancelled");
            let err = PipeError::new(DockerError::Cancelled);
            stdout.fail(err.clone());
            stderr.fail(err);
            Err(DockerError::Cancelled)
        }
        Err(e) => {
            tracing::warn!(error = %e, "attach stream failed");
            let err = PipeError::new(e);
            stdout.fail(err.clone());
            stderr.fail(err.clone());
            Err(err.into())
        }
    }
}

async fn copy_output(
    reader: &mut HijackedReader,
    stdout: &mut StreamSink,
    stderr: &mut StreamSink,
    tty: bool,
) -> Result<u64> {
    if tty {
        tokio::io::copy(reader, stdout)
            .await
            .map_err(DockerError::from)
    } else {
        std_copy(stdout, stderr, reader).await.map_err(|e| {
            tracing::debug!(written = e.written, "stream copy stopped early");
            e.source
        })
    }
}

/// Destination for one output stream.
///
/// A pipe whose reader was dropped turns into a discard sink, so one
/// abandoned stream does not end the others.
enum StreamSink {
    Pipe(PipeWriter),
    Discard(Sink),
}

impl StreamSink {
    fn new(pipe: Option<PipeWriter>) -> Self {
        match pipe {
            Some(tx) => Self::Pipe(tx),
            None => Self::Discard(tokio::io::sink()),
        }
    }

    fn fail(self, err: PipeError) {
        if let Self::Pipe(tx) = self {
            tx.close_with_error(err);
        }
    }
}

impl AsyncWrite for StreamSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        if let Self::Pipe(tx) = &mut *this {
            match Pin::new(tx).poll_write(cx, buf) {
                Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::debug!("output reader dropped, discarding the rest");
                    *this = Self::Discard(tokio::io::sink());
                }
                other => return other,
            }
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Pipe(tx) => Pin::new(tx).poll_flush(cx),
            Self::Discard(sink) => Pin::new(sink).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Pipe(tx) => Pin::new(tx).poll_shutdown(cx),
            Self::Discard(sink) => Pin::new(sink).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, StdDescriptor};
    use bytes::Bytes;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    fn session(streams: Streams, tty: bool) -> (AttachIo, DuplexStream) {
        let (client, daemon) = duplex(64 * 1024);
        let conn = HijackedConn::new(Box::new(client), Bytes::new());
        (AttachIo::start(conn, streams, tty, 4), daemon)
    }

    const OUT_ERR: Streams = Streams {
        stdin: false,
        stdout: true,
        stderr: true,
    };

    async fn read_all(reader: &mut PipeReader) -> io::Result<String> {
        let mut out = String::new();
        reader.read_to_string(&mut out).await?;
        Ok(out)
    }

    #[tokio::test]
    async fn test_multiplexed_output_is_routed() {
        let (mut io, mut daemon) = session(OUT_ERR, false);
        let mut stdout = io.take_stdout().unwrap();
        let mut stderr = io.take_stderr().unwrap();

        daemon
            .write_all(&build_frame(StdDescriptor::Stdout, b"hello").unwrap())
            .await
            .unwrap();
        daemon
            .write_all(&build_frame(StdDescriptor::Stderr, b"bad").unwrap())
            .await
            .unwrap();
        drop(daemon);

        let (out, err) = tokio::join!(read_all(&mut stdout), read_all(&mut stderr));
        assert_eq!(out.unwrap(), "hello");
        assert_eq!(err.unwrap(), "bad");
        assert_eq!(io.wait().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_tty_output_is_raw() {
        let (mut io, mut daemon) = session(OUT_ERR, true);
        assert!(io.is_tty());
        assert!(io.take_stderr().is_none());
        let mut stdout = io.take_stdout().unwrap();

        daemon.write_all(b"\x01raw tty bytes").await.unwrap();
        drop(daemon);

        assert_eq!(read_all(&mut stdout).await.unwrap(), "\x01raw tty bytes");
        assert_eq!(io.wait().await.unwrap(), 14);
    }

    #[tokio::test]
    async fn test_unrequested_stream_is_discarded() {
        let streams = Streams {
            stdout: true,
            ..Default::default()
        };
        let (mut io, mut daemon) = session(streams, false);
        assert!(io.take_stderr().is_none());
        let mut stdout = io.take_stdout().unwrap();

        daemon
            .write_all(&build_frame(StdDescriptor::Stderr, b"ignored").unwrap())
            .await
            .unwrap();
        daemon
            .write_all(&build_frame(StdDescriptor::Stdout, b"kept").unwrap())
            .await
            .unwrap();
        drop(daemon);

        assert_eq!(read_all(&mut stdout).await.unwrap(), "kept");
        assert_eq!(io.wait().await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_remote_error_reaches_every_pipe() {
        let (mut io, mut daemon) = session(OUT_ERR, false);
        let mut stdout = io.take_stdout().unwrap();
        let mut stderr = io.take_stderr().unwrap();

        daemon
            .write_all(&build_frame(StdDescriptor::Systemerr, b"container died").unwrap())
            .await
            .unwrap();

        let (out, err) = tokio::join!(read_all(&mut stdout), read_all(&mut stderr));
        assert!(out.unwrap_err().to_string().contains("container died"));
        assert!(err.unwrap_err().to_string().contains("container died"));

        let err = io.wait().await.unwrap_err();
        match err {
            DockerError::Pipe(e) => assert!(matches!(e.error(), DockerError::Remote(m) if m == "container died")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_stream_fails_pipes() {
        let (mut io, mut daemon) = session(OUT_ERR, false);
        let mut stdout = io.take_stdout().unwrap();

        daemon.write_all(&[9, 0, 0, 0, 0, 0, 0, 1, b'x']).await.unwrap();
        assert!(read_all(&mut stdout).await.is_err());
        assert!(io.wait().await.unwrap_err().is_malformed_stream());
    }

    #[tokio::test]
    async fn test_dropped_reader_does_not_stop_other_stream() {
        let (mut io, mut daemon) = session(OUT_ERR, false);
        drop(io.take_stdout());
        let mut stderr = io.take_stderr().unwrap();

        daemon
            .write_all(&build_frame(StdDescriptor::Stdout, b"lost").unwrap())
            .await
            .unwrap();
        daemon
            .write_all(&build_frame(StdDescriptor::Stderr, b"seen").unwrap())
            .await
            .unwrap();
        drop(daemon);

        assert_eq!(read_all(&mut stderr).await.unwrap(), "seen");
        assert!(io.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_copy_stdin_then_half_close() {
        let streams = Streams {
            stdin: true,
            stdout: true,
            stderr: false,
        };
        let (mut io, mut daemon) = session(streams, true);

        let copied = io.copy_stdin_from(&mut &b"input line\n"[..]).await.unwrap();
        assert_eq!(copied, 11);

        let mut received = Vec::new();
        daemon.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"input line\n");

        daemon.write_all(b"echoed").await.unwrap();
        drop(daemon);
        let mut stdout = io.take_stdout().unwrap();
        assert_eq!(read_all(&mut stdout).await.unwrap(), "echoed");
    }

    #[tokio::test]
    async fn test_copy_stdin_requires_stdin() {
        let (mut io, _daemon) = session(OUT_ERR, false);
        let err = io.copy_stdin_from(&mut &b"x"[..]).await.unwrap_err();
        assert!(matches!(err, DockerError::InvalidInput(_)));
    }

    fn is_cancelled(err: &io::Error) -> bool {
        err.get_ref()
            .and_then(|e| e.downcast_ref::<PipeError>())
            .map_or(false, |e| matches!(e.error(), DockerError::Cancelled))
    }

    #[tokio::test]
    async fn test_close_cancels_pump() {
        let (mut io, _daemon) = session(OUT_ERR, false);
        let mut stdout = io.take_stdout().unwrap();
        let mut stderr = io.take_stderr().unwrap();

        io.close().await;
        assert!(is_cancelled(&read_all(&mut stdout).await.unwrap_err()));
        assert!(is_cancelled(&read_all(&mut stderr).await.unwrap_err()));
    }

    #[tokio::test]
    async fn test_drop_cancels_pump() {
        let (mut io, _daemon) = session(OUT_ERR, false);
        let mut stdout = io.take_stdout().unwrap();

        drop(io);
        let err = read_all(&mut stdout).await.unwrap_err();
        assert!(is_cancelled(&err), "{err}");
    }

    #[tokio::test]
    async fn test_drop_keeps_queued_output_then_fails() {
        let (mut io, mut daemon) = session(OUT_ERR, false);
        let mut stdout = io.take_stdout().unwrap();

        daemon
            .write_all(&build_frame(StdDescriptor::Stdout, b"before").unwrap())
            .await
            .unwrap();
        let mut buf = [0u8; 6];
        stdout.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"before");

        drop(io);
        // The daemon may keep talking; the connection can be gone already.
        let _ = daemon
            .write_all(&build_frame(StdDescriptor::Stdout, b"after").unwrap())
            .await;

        let mut rest = Vec::new();
        let err = stdout.read_to_end(&mut rest).await.unwrap_err();
        assert!(is_cancelled(&err), "{err}");
    }

    #[tokio::test]
    async fn test_close_with_full_pipes_does_not_hang() {
        let (mut io, mut daemon) = session(OUT_ERR, true);
        let mut stdout = io.take_stdout().unwrap();

        // More chunks than the pipe holds, and nobody reading.
        for _ in 0..12 {
            daemon.write_all(&[b'x'; 4096]).await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        tokio::time::timeout(std::time::Duration::from_secs(1), io.close())
            .await
            .expect("close should not wait for a reader");

        let mut rest = Vec::new();
        let err = stdout.read_to_end(&mut rest).await.unwrap_err();
        assert!(is_cancelled(&err), "{err}");
        assert!(!rest.is_empty());
    }
}
