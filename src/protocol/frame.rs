//! Frame struct and builders.
//!
//! A frame is one header plus its payload. Uses `bytes::Bytes` so payloads
//! can be shared with writers and pipes without copying.
//!
//! # Example
//!
//! ```
//! use dockwire_client::protocol::{Frame, StdDescriptor};
//!
//! let frame = Frame::new(StdDescriptor::Stdout, "hello").unwrap();
//! assert_eq!(frame.payload(), b"hello");
//! assert_eq!(frame.encode().len(), 8 + 5);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{StdDescriptor, StdHeader, HEADER_SIZE};
use crate::error::{DockerError, Result};

/// A complete stdio frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: StdHeader,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame for `descriptor`.
    ///
    /// Fails if the payload does not fit the 32-bit length field.
    pub fn new(descriptor: StdDescriptor, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        let size = frame_size(payload.len())?;
        Ok(Self {
            header: StdHeader::new(descriptor, size),
            payload,
        })
    }

    #[inline]
    pub fn descriptor(&self) -> StdDescriptor {
        self.header.descriptor
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encode header and payload into one contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

pub(crate) fn frame_size(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        DockerError::InvalidInput(format!("frame payload of {len} bytes exceeds u32::MAX"))
    })
}

/// Build a complete encoded frame from a descriptor and payload.
pub fn build_frame(descriptor: StdDescriptor, payload: &[u8]) -> Result<Bytes> {
    Ok(Frame::new(descriptor, Bytes::copy_from_slice(payload))?.encode())
}
