//! Container log streaming.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::TryStreamExt;
use http_body_util::{BodyDataStream, BodyExt};
use hyper::Response;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::io::StreamReader;

use crate::error::{CopyError, DockerError};
use crate::protocol::{std_copy, StdReader};
use crate::transport::{Body, RequestOptions};

/// Options for [`Container::logs`](super::Container::logs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogsConfig {
    pub stdout: bool,
    pub stderr: bool,
    /// Only lines after this timestamp (RFC 3339 or unix seconds).
    pub since: Option<String>,
    pub until: Option<String>,
    pub timestamps: bool,
    /// Keep the stream open for new output.
    pub follow: bool,
    /// Number of lines from the end, or `all`.
    pub tail: Option<String>,
    pub details: bool,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            since: None,
            until: None,
            timestamps: false,
            follow: false,
            tail: None,
            details: false,
        }
    }
}

impl LogsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout(mut self, enabled: bool) -> Self {
        self.stdout = enabled;
        self
    }

    pub fn stderr(mut self, enabled: bool) -> Self {
        self.stderr = enabled;
        self
    }

    pub fn since(mut self, since: impl Into<String>) -> Self {
        self.since = Some(since.into());
        self
    }

    pub fn until(mut self, until: impl Into<String>) -> Self {
        self.until = Some(until.into());
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    pub fn follow(mut self, enabled: bool) -> Self {
        self.follow = enabled;
        self
    }

    pub fn tail(mut self, lines: impl Into<String>) -> Self {
        self.tail = Some(lines.into());
        self
    }

    pub fn details(mut self, enabled: bool) -> Self {
        self.details = enabled;
        self
    }

    pub(crate) fn request(&self, id: &str) -> RequestOptions {
        let mut opts = RequestOptions::get(format!("/containers/{id}/logs"))
            .query_bool("stdout", self.stdout)
            .query_bool("stderr", self.stderr)
            .query_bool("timestamps", self.timestamps)
            .query_bool("follow", self.follow)
            .query_bool("details", self.details);
        if let Some(since) = &self.since {
            opts = opts.query("since", since.as_str());
        }
        if let Some(until) = &self.until {
            opts = opts.query("until", until.as_str());
        }
        if let Some(tail) = &self.tail {
            opts = opts.query("tail", tail.as_str());
        }
        opts
    }
}

type LogStream =
    futures::stream::MapErr<BodyDataStream<Body>, fn(DockerError) -> io::Error>;

/// Log output as a byte stream.
///
/// For containers without a TTY the bytes are multiplexed frames; use
/// [`demux`](Self::demux) or [`frames`](Self::frames) to split them.
pub struct Logs {
    inner: StreamReader<LogStream, bytes::Bytes>,
}

impl Logs {
    pub(crate) fn new(resp: Response<Body>) -> Self {
        let stream = resp
            .into_body()
            .into_data_stream()
            .map_err(into_io as fn(DockerError) -> io::Error);
        Self {
            inner: StreamReader::new(stream),
        }
    }

    /// Copy stdout and stderr frames to the given writers.
    pub async fn demux<O, E>(self, stdout: &mut O, stderr: &mut E) -> Result<u64, CopyError>
    where
        O: AsyncWrite + Unpin + ?Sized,
        E: AsyncWrite + Unpin + ?Sized,
    {
        std_copy(stdout, stderr, self).await
    }

    /// Read the stream frame by frame.
    pub fn frames(self) -> StdReader<Self> {
        StdReader::new(self)
    }
}

impl AsyncRead for Logs {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl std::fmt::Debug for Logs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logs").finish_non_exhaustive()
    }
}

fn into_io(err: DockerError) -> io::Error {
    match err {
        DockerError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}
