//! Demultiplexing copy from a framed stdio stream into two sinks.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::buffer_pool::PooledBuffer;
use super::std_reader::StdReader;
use super::wire_format::{StdDescriptor, StdHeader};
use crate::error::{CopyError, DockerError};

/// Maximum number of systemerr payload bytes kept for the error message.
pub const MAX_SYSTEM_ERROR_SIZE: usize = 32 * 1024;

/// Copy a multiplexed stream into `stdout` and `stderr` until EOF.
///
/// Stdout frames go to `stdout`, stderr frames to `stderr`. A systemerr
/// frame ends the copy with [`DockerError::Remote`] carrying its text, and a
/// stdin frame ends it with [`DockerError::UnexpectedStream`].
///
/// Returns the number of payload bytes written on a clean end of stream.
/// On failure, [`CopyError::written`] holds the bytes written before it.
/// Pass `tokio::io::sink()` for a stream the caller does not want.
///
/// # Example
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use dockwire_client::protocol::{build_frame, std_copy, StdDescriptor};
///
/// let mut input = build_frame(StdDescriptor::Stdout, b"hello").unwrap().to_vec();
/// input.extend_from_slice(&build_frame(StdDescriptor::Stderr, b"bad").unwrap());
///
/// let (mut out, mut err) = (Vec::new(), Vec::new());
/// let written = std_copy(&mut out, &mut err, &input[..]).await.unwrap();
/// assert_eq!(written, 8);
/// assert_eq!(out, b"hello");
/// assert_eq!(err, b"bad");
/// # }
/// ```
pub async fn std_copy<O, E, R>(stdout: &mut O, stderr: &mut E, src: R) -> Result<u64, CopyError>
where
    O: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + Unpin,
{
    let mut reader = StdReader::new(src);
    let mut buf = PooledBuffer::acquire();
    let mut written: u64 = 0;

    loop {
        let header = match reader.next().await {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(written),
            Err(e) => return Err(CopyError::new(written, e)),
        };

        match header.descriptor {
            StdDescriptor::Stdout => {
                drain_frame(&mut reader, &mut buf, stdout, header.descriptor, &mut written).await?
            }
            StdDescriptor::Stderr => {
                drain_frame(&mut reader, &mut buf, stderr, header.descriptor, &mut written).await?
            }
            StdDescriptor::Systemerr => {
                let message = read_system_error(&mut reader, &mut buf, header)
                    .await
                    .map_err(|e| CopyError::new(written, e))?;
                tracing::debug!(%message, "daemon reported error in stream");
                return Err(CopyError::new(written, DockerError::Remote(message)));
            }
            StdDescriptor::Stdin => {
                return Err(CopyError::new(
                    written,
                    DockerError::UnexpectedStream(header.descriptor),
                ));
            }
        }
    }
}

/// Copy the rest of the current frame into `sink`, counting every byte
/// the sink accepts.
async fn drain_frame<R, W>(
    reader: &mut StdReader<R>,
    buf: &mut [u8],
    sink: &mut W,
    stream: StdDescriptor,
    written: &mut u64,
) -> Result<(), CopyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let sink_error = |written: u64, source: std::io::Error| {
        CopyError::new(written, DockerError::Sink { stream, source })
    };

    loop {
        let n = reader
            .read(buf)
            .await
            .map_err(|e| CopyError::new(*written, e))?;
        if n == 0 {
            break;
        }

        let mut chunk = &buf[..n];
        while !chunk.is_empty() {
            let m = sink
                .write(chunk)
                .await
                .map_err(|e| sink_error(*written, e))?;
            if m == 0 {
                return Err(sink_error(*written, std::io::ErrorKind::WriteZero.into()));
            }
            *written += m as u64;
            chunk = &chunk[m..];
        }
    }

    sink.flush().await.map_err(|e| sink_error(*written, e))
}

/// Read at most [`MAX_SYSTEM_ERROR_SIZE`] bytes of a systemerr payload.
async fn read_system_error<R: AsyncRead + Unpin>(
    reader: &mut StdReader<R>,
    buf: &mut [u8],
    header: StdHeader,
) -> Result<String, DockerError> {
    let limit = header.len().min(MAX_SYSTEM_ERROR_SIZE).min(buf.len());
    let mut filled = 0;
    while filled < limit {
        let n = reader.read(&mut buf[filled..limit]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(String::from_utf8_lossy(&buf[..filled]).into_owned())
}
