//! Wire format encoding and decoding.
//!
//! Implements the 8-byte stdio frame header used by attach, exec and logs
//! when the container has no TTY:
//! ```text
//! ┌────────────┬──────────┬──────────┐
//! │ Descriptor │ Reserved │ Length   │
//! │ 1 byte     │ 3 bytes  │ 4 bytes  │
//! │            │ (zero)   │ uint32 BE│
//! └────────────┴──────────┴──────────┘
//! ```
//!
//! The payload follows the header and is exactly `Length` bytes long.

use std::fmt;

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Offset of the stream descriptor byte.
pub const DESCRIPTOR_INDEX: usize = 0;

/// Offset of the big-endian payload length.
pub const SIZE_INDEX: usize = 4;

/// Stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StdDescriptor {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
    /// Error text written by the daemon itself.
    Systemerr = 3,
}

impl StdDescriptor {
    /// Wire value of this descriptor.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for StdDescriptor {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Stdin),
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            3 => Ok(Self::Systemerr),
            other => Err(other),
        }
    }
}

impl fmt::Display for StdDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Systemerr => "systemerr",
        };
        f.write_str(name)
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdHeader {
    /// Which stream the payload belongs to.
    pub descriptor: StdDescriptor,
    /// Payload length in bytes.
    pub size: u32,
}

impl StdHeader {
    /// Create a new header.
    pub fn new(descriptor: StdDescriptor, size: u32) -> Self {
        Self { descriptor, size }
    }

    /// Encode header to bytes (Big Endian, reserved bytes zero).
    ///
    /// # Example
    ///
    /// ```
    /// use dockwire_client::protocol::{StdDescriptor, StdHeader};
    ///
    /// let bytes = StdHeader::new(StdDescriptor::Stderr, 3).encode();
    /// assert_eq!(bytes, [2, 0, 0, 0, 0, 0, 0, 3]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[DESCRIPTOR_INDEX] = self.descriptor.as_u8();
        buf[SIZE_INDEX..HEADER_SIZE].copy_from_slice(&self.size.to_be_bytes());
        buf
    }

    /// Decode a header.
    ///
    /// Reserved bytes are ignored. Returns the raw descriptor byte as the
    /// error when it is not a known stream.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self, u8> {
        let descriptor = StdDescriptor::try_from(buf[DESCRIPTOR_INDEX])?;
        let size = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Ok(Self { descriptor, size })
    }

    /// Payload length as usize.
    #[inline]
    pub fn len(&self) -> usize {
        self.size as usize
    }

    /// True for zero-length frames.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}
