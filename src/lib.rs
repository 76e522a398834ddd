//! # dockwire-client
//!
//! Docker Engine API client for the streaming parts of the API.
//!
//! This crate attaches to containers, runs exec sessions and reads logs
//! over connections hijacked from HTTP/1.1, and decodes the daemon's
//! multiplexed stdout/stderr format.
//!
//! ## Architecture
//!
//! - **Transport** (`transport`): dials the daemon and either sends a plain
//!   request or upgrades the connection to a raw duplex stream
//! - **Protocol** (`protocol`): 8-byte frame headers, [`protocol::StdReader`]
//!   and [`protocol::std_copy`] for splitting output streams
//! - **Container** (`container`): attach / exec / logs orchestration with
//!   per-stream pipes
//!
//! ## Example
//!
//! ```ignore
//! use dockwire_client::{Client, container::ExecConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::from_env()?;
//!     let exec = client
//!         .container("web")
//!         .exec(ExecConfig::new(["ls", "-l"]))
//!         .await?;
//!
//!     let mut io = exec.start().await?;
//!     let mut stdout = io.take_stdout().unwrap();
//!     tokio::io::copy(&mut stdout, &mut tokio::io::stdout()).await?;
//!     io.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod pipe;
pub mod protocol;
pub mod transport;

mod client;

pub use client::{Client, ClientBuilder, Ping};
pub use config::ClientConfig;
pub use error::{ApiErrorKind, CopyError, DockerError, Result, StreamError};
