//! Container operations - attach, exec, logs.
//!
//! Provides:
//! - [`Container`]: handle for one container
//! - [`AttachIo`]: stdin writer and output pipes of a live session
//! - [`ExecProcess`]: a created exec instance
//! - [`Logs`]: log output as a byte stream

mod attach;
mod exec;
mod inspect;
mod logs;
mod stdio;

use tokio::io::AsyncWriteExt;

use crate::client::Client;
use crate::error::Result;
use crate::transport::{read_json, RequestOptions};

pub use attach::AttachConfig;
pub use exec::{ExecConfig, ExecProcess};
pub use inspect::{
    ContainerConfig, ContainerInspect, ContainerState, ExecInspect, ExecProcessConfig,
    DEFAULT_INSPECT_LIMIT,
};
pub use logs::{Logs, LogsConfig};
pub use stdio::AttachIo;

/// Handle for a container, by id or name.
///
/// Creating one sends nothing; every method is a separate request.
#[derive(Debug, Clone)]
pub struct Container {
    client: Client,
    id: String,
}

impl Container {
    pub(crate) fn new(client: Client, id: String) -> Self {
        Self { client, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fetch the container's low-level description.
    pub async fn inspect(&self) -> Result<ContainerInspect> {
        let resp = self
            .client
            .do_request(RequestOptions::get(format!("/containers/{}/json", self.id)))
            .await?;
        read_json(resp, DEFAULT_INSPECT_LIMIT).await
    }

    /// Attach to the container's streams.
    ///
    /// When any output stream is requested the container is inspected to
    /// learn whether it has a TTY, which decides how output is decoded.
    pub async fn attach(&self, config: AttachConfig) -> Result<AttachIo> {
        let mut conn = self.client.do_raw(config.request(&self.id)).await?;

        let tty = if config.wants_output() {
            match self.inspect().await {
                Ok(info) => info.config.tty,
                Err(e) => {
                    if let Err(shutdown) = conn.shutdown().await {
                        tracing::debug!(error = %shutdown, "closing attach connection");
                    }
                    return Err(e);
                }
            }
        } else {
            false
        };

        tracing::debug!(container = %self.id, tty, "attached");
        Ok(AttachIo::start(
            conn,
            config.streams(),
            tty,
            self.client.config().pipe_capacity,
        ))
    }

    /// Create an exec instance; it is not started yet.
    pub async fn exec(&self, config: ExecConfig) -> Result<ExecProcess> {
        ExecProcess::create(self.client.clone(), &self.id, &config).await
    }

    /// Stream the container's logs.
    pub async fn logs(&self, config: LogsConfig) -> Result<Logs> {
        let resp = self.client.do_request(config.request(&self.id)).await?;
        Ok(Logs::new(resp))
    }
}
