//! Protocol module - the multiplexed stdio stream format.
//!
//! Containers without a TTY send stdout and stderr over one connection,
//! each chunk wrapped in a frame:
//! - 8-byte header encoding/decoding
//! - `StdReader`, a frame-by-frame reader
//! - `std_copy`, the demultiplexer that routes frames into two sinks
//! - `StdWriter`, the inverse, for producing the format

mod buffer_pool;
mod frame;
mod std_copy;
mod std_reader;
mod std_writer;
mod wire_format;

pub use buffer_pool::{PooledBuffer, COPY_BUFFER_POOL_SIZE, COPY_BUFFER_SIZE};
pub use frame::{build_frame, Frame};
pub use std_copy::{std_copy, MAX_SYSTEM_ERROR_SIZE};
pub use std_reader::StdReader;
pub use std_writer::StdWriter;
pub use wire_format::{StdDescriptor, StdHeader, DESCRIPTOR_INDEX, HEADER_SIZE, SIZE_INDEX};
