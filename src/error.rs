//! Error types for dockwire-client.
//!
//! [`DockerError`] is the crate-wide error. Codec failures are reported as
//! [`StreamError`], which is `Clone` so a failed [`StdReader`] can hand the
//! same error back on every later call.
//!
//! [`StdReader`]: crate::protocol::StdReader

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::pipe::PipeError;
use crate::protocol::StdDescriptor;

/// Main error type for all dockwire operations.
#[derive(Debug, Error)]
pub enum DockerError {
    /// I/O error on a socket, pipe or sink.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP protocol error from hyper.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// TLS setup failed: bad certificates or configuration.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    Request(#[from] hyper::http::Error),

    /// Framing error while reading a multiplexed stream.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The daemon reported an error inside the multiplexed stream.
    #[error("error from daemon in stream: {0}")]
    Remote(String),

    /// A frame arrived for a stream the demultiplexer does not route.
    #[error("got data for unexpected stream: {0}")]
    UnexpectedStream(StdDescriptor),

    /// Writing demultiplexed output to a sink failed.
    #[error("error copying {stream} to its sink: {source}")]
    Sink {
        stream: StdDescriptor,
        #[source]
        source: io::Error,
    },

    /// The daemon answered an upgrade request without switching protocols.
    #[error("unable to upgrade to {protocol}, received {status}: {message}")]
    UpgradeRejected {
        protocol: String,
        status: u16,
        kind: ApiErrorKind,
        message: String,
    },

    /// The daemon returned an error response.
    #[error("{message}: error in response, status code: {status}")]
    Api {
        kind: ApiErrorKind,
        status: u16,
        message: String,
    },

    /// DOCKER_HOST (or a configured host) could not be used.
    #[error("unsupported docker host: {0}")]
    UnsupportedHost(String),

    /// The caller passed invalid arguments.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation is not supported by this connection.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// Connect/upgrade phase did not finish within the configured timeout.
    #[error("timed out waiting for the daemon")]
    Timeout,

    /// A response carried an unexpected content type.
    #[error("unexpected response content type: {0}")]
    ContentType(String),

    /// The attach stream failed; every output pipe received the same error.
    #[error(transparent)]
    Pipe(#[from] PipeError),

    /// The operation was cancelled by closing its handle.
    #[error("operation cancelled")]
    Cancelled,
}

impl DockerError {
    /// The errdefs-style category of this error, if it came from the daemon.
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Self::Api { kind, .. } | Self::UpgradeRejected { kind, .. } => Some(*kind),
            Self::InvalidInput(_) => Some(ApiErrorKind::InvalidInput),
            Self::Pipe(e) => e.error().api_kind(),
            _ => None,
        }
    }

    /// True if the resource was not found (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        self.api_kind() == Some(ApiErrorKind::NotFound)
    }

    /// True for daemon conflicts and for frame-reader usage errors.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Stream(e) => e.is_conflict(),
            Self::Pipe(e) => e.error().is_conflict(),
            _ => self.api_kind() == Some(ApiErrorKind::Conflict),
        }
    }

    /// True if the multiplexed stream violated the wire format.
    pub fn is_malformed_stream(&self) -> bool {
        match self {
            Self::Stream(e) => e.is_malformed(),
            Self::Pipe(e) => e.error().is_malformed_stream(),
            _ => false,
        }
    }
}

/// Errors produced while decoding the multiplexed stdio format.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Header byte 0 is not one of the four known descriptors.
    #[error("malformed stream at offset {offset}: unexpected stream descriptor {descriptor}")]
    UnknownDescriptor { descriptor: u8, offset: u64 },

    /// The source ended part way through a frame header.
    #[error("malformed stream at offset {offset}: truncated header ({read} of 8 bytes)")]
    TruncatedHeader { read: usize, offset: u64 },

    /// The source ended before the declared payload length was delivered.
    #[error("malformed stream at offset {offset}: frame ended after {read} of {expected} payload bytes")]
    TruncatedPayload { read: u32, expected: u32, offset: u64 },

    /// `next()` was called before the current frame was drained.
    #[error("unconsumed data in stream; read the current frame to the end before calling next")]
    Conflict,

    /// The underlying source failed.
    #[error("error reading stdio stream at offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: Arc<io::Error>,
    },
}

impl StreamError {
    /// True for protocol violations (not for I/O or usage errors).
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::UnknownDescriptor { .. } | Self::TruncatedHeader { .. } | Self::TruncatedPayload { .. }
        )
    }

    /// True if the caller asked for the next frame too early.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match &err {
            StreamError::Io { source, .. } => source.kind(),
            StreamError::TruncatedHeader { .. } | StreamError::TruncatedPayload { .. } => {
                io::ErrorKind::UnexpectedEof
            }
            StreamError::Conflict => io::ErrorKind::WouldBlock,
            StreamError::UnknownDescriptor { .. } => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

/// Category of a daemon error, derived from the HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    NotFound,
    InvalidInput,
    Conflict,
    Unauthorized,
    Unavailable,
    Forbidden,
    NotModified,
    NotImplemented,
    Unknown,
}

impl ApiErrorKind {
    /// Map an HTTP status code to an error category.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => Self::NotFound,
            400 => Self::InvalidInput,
            409 => Self::Conflict,
            401 => Self::Unauthorized,
            503 => Self::Unavailable,
            403 => Self::Forbidden,
            304 => Self::NotModified,
            501 => Self::NotImplemented,
            400..=499 => Self::InvalidInput,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::InvalidInput => "invalid input",
            Self::Conflict => "conflict",
            Self::Unauthorized => "unauthorized",
            Self::Unavailable => "unavailable",
            Self::Forbidden => "forbidden",
            Self::NotModified => "not modified",
            Self::NotImplemented => "not implemented",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A demultiplexing copy that stopped early.
///
/// `written` counts the bytes delivered to the sinks before the failure.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct CopyError {
    /// Bytes successfully written before the copy stopped.
    pub written: u64,
    /// Why the copy stopped.
    #[source]
    pub source: DockerError,
}

impl CopyError {
    pub(crate) fn new(written: u64, source: impl Into<DockerError>) -> Self {
        Self {
            written,
            source: source.into(),
        }
    }
}

/// Result type alias using DockerError.
pub type Result<T> = std::result::Result<T, DockerError>;
