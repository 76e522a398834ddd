//! Multiplexing writer: encodes frames onto an `AsyncWrite`.
//!
//! Header and payload go out in a single `write_vectored` call where the
//! sink allows it. Partial writes are finished by rebuilding the slice list
//! for the remaining bytes.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::frame::{frame_size, Frame};
use super::wire_format::{StdDescriptor, StdHeader, HEADER_SIZE};
use crate::error::{DockerError, Result};

/// Writes multiplexed stdio frames.
pub struct StdWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> StdWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one frame for `descriptor` and flush.
    pub async fn write(&mut self, descriptor: StdDescriptor, payload: &[u8]) -> Result<()> {
        let header = StdHeader::new(descriptor, frame_size(payload.len())?).encode();
        let parts: [&[u8]; 2] = [&header, payload];
        write_all_vectored(&mut self.inner, &parts).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write an already built frame and flush.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_batch(std::slice::from_ref(frame)).await
    }

    /// Write several frames with as few syscalls as possible, then flush.
    pub async fn write_batch(&mut self, frames: &[Frame]) -> Result<()> {
        if frames.is_empty() {
            return Ok(());
        }

        let headers: Vec<[u8; HEADER_SIZE]> = frames.iter().map(|f| f.header.encode()).collect();
        let mut parts: Vec<&[u8]> = Vec::with_capacity(frames.len() * 2);
        for (header, frame) in headers.iter().zip(frames) {
            parts.push(header);
            parts.push(&frame.payload);
        }

        write_all_vectored(&mut self.inner, &parts).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write a payload shared as `Bytes`.
    pub async fn write_bytes(&mut self, descriptor: StdDescriptor, payload: Bytes) -> Result<()> {
        self.write(descriptor, &payload).await
    }

    /// Shut down the underlying writer.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Write every byte of `parts` in order, using vectored writes.
async fn write_all_vectored<W>(writer: &mut W, parts: &[&[u8]]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = parts.iter().map(|p| p.len()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(parts, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(DockerError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    Ok(())
}

/// Build IoSlice array for remaining data after a partial write.
fn build_remaining_slices<'a>(parts: &[&'a [u8]], skip_bytes: usize) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(parts.len());
    let mut skipped = 0;

    for part in parts {
        let end = skipped + part.len();
        if skip_bytes < end && !part.is_empty() {
            let start = skip_bytes.saturating_sub(skipped);
            slices.push(IoSlice::new(&part[start..]));
        }
        skipped = end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StdReader;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_write_single_frame() {
        let mut writer = StdWriter::new(Cursor::new(Vec::new()));
        writer.write(StdDescriptor::Stdout, b"hello").await.unwrap();

        let bytes = writer.into_inner().into_inner();
        assert_eq!(&bytes[..HEADER_SIZE], &[1, 0, 0, 0, 0, 0, 0, 5]);
        assert_eq!(&bytes[HEADER_SIZE..], b"hello");
    }

    #[tokio::test]
    async fn test_write_batch_is_readable() {
        let (client, server) = duplex(4096);
        let mut writer = StdWriter::new(client);
        let frames = vec![
            Frame::new(StdDescriptor::Stdout, "one").unwrap(),
            Frame::new(StdDescriptor::Stderr, Bytes::new()).unwrap(),
            Frame::new(StdDescriptor::Stdout, "two").unwrap(),
        ];
        writer.write_batch(&frames).await.unwrap();
        drop(writer);

        let mut reader = StdReader::new(server);
        let mut buf = [0u8; 16];
        for expected in &frames {
            let header = reader.next().await.unwrap().unwrap();
            assert_eq!(header, expected.header);
            let n = reader.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], expected.payload());
        }
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_writes_complete() {
        // A tiny duplex buffer forces many partial vectored writes.
        let (client, mut server) = duplex(7);
        let payload = vec![0xAB; 1000];

        let write = tokio::spawn(async move {
            let mut writer = StdWriter::new(client);
            writer
                .write(StdDescriptor::Stderr, &payload)
                .await
                .unwrap();
        });

        let mut out = Vec::new();
        server.read_to_end(&mut out).await.unwrap();
        write.await.unwrap();

        assert_eq!(out.len(), HEADER_SIZE + 1000);
        assert_eq!(out[0], 2);
        assert!(out[HEADER_SIZE..].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_build_remaining_slices() {
        let header = [1u8, 0, 0, 0, 0, 0, 0, 3];
        let parts: [&[u8]; 2] = [&header, b"abc"];

        let slices = build_remaining_slices(&parts, 0);
        assert_eq!(slices.len(), 2);

        let slices = build_remaining_slices(&parts, 5);
        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[0], &header[5..]);

        let slices = build_remaining_slices(&parts, 9);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], b"bc");

        assert!(build_remaining_slices(&parts, 11).is_empty());
    }
}
