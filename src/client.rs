//! Client and builder.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring how the daemon
//! is reached. The [`Client`] owns the transport and adds the API version
//! prefix and status checking to every request.
//!
//! # Example
//!
//! ```ignore
//! use dockwire_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .host("unix:///var/run/docker.sock")
//!         .api_version("1.43")
//!         .build()?;
//!
//!     let ping = client.ping().await?;
//!     println!("daemon API {:?}", ping.api_version);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use hyper::header::HeaderMap;
use hyper::Response;

use crate::config::ClientConfig;
use crate::container::Container;
use crate::error::Result;
use crate::transport::{
    check_response, Body, DockerCliConfig, HijackedConn, HttpTransport, RequestOptions, TlsConfig,
    Transport,
};

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transport: None,
        }
    }

    /// Start from `DOCKER_HOST` / `DOCKER_API_VERSION`.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            config: ClientConfig::from_env()?,
            transport: None,
        })
    }

    /// Daemon address (`unix:///path` or `tcp://host:port`).
    ///
    /// Default: `unix:///var/run/docker.sock`
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Pin the API version (e.g. `"1.43"`).
    ///
    /// Default: none, the daemon's own version is used.
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.config.api_version = Some(version.into());
        self
    }

    /// Limit connect and upgrade time.
    ///
    /// Default: no limit
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Chunks buffered per attach output pipe.
    ///
    /// Default: 16
    pub fn pipe_capacity(mut self, capacity: usize) -> Self {
        self.config.pipe_capacity = capacity;
        self
    }

    /// Connect through `docker system dial-stdio`.
    pub fn docker_cli(mut self, cli: DockerCliConfig) -> Self {
        self.config.docker_cli = Some(cli);
        self
    }

    /// Secure a `tcp://` host with TLS.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = Some(tls);
        self
    }

    /// Use a custom transport instead of dialing `host`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client.
    ///
    /// Fails if the host cannot be parsed. No connection is made yet.
    pub fn build(self) -> Result<Client> {
        match self.transport {
            Some(transport) => Ok(Client::with_transport(transport, self.config)),
            None => Client::from_config(self.config),
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Response of `GET /_ping`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ping {
    pub api_version: Option<String>,
    pub os_type: Option<String>,
    pub experimental: bool,
    pub builder_version: Option<String>,
}

impl Ping {
    fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            api_version: get("API-Version"),
            os_type: get("OSType"),
            experimental: get("Docker-Experimental").as_deref() == Some("true"),
            builder_version: get("Builder-Version"),
        }
    }
}

/// Docker Engine API client.
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Client configured from the environment.
    pub fn from_env() -> Result<Self> {
        Self::from_config(ClientConfig::from_env()?)
    }

    /// Client for the given settings over [`HttpTransport`].
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.dialer()?).with_timeout(config.timeout);
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Client over an explicit transport.
    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a request under the API version prefix; non-success status
    /// codes become [`DockerError::Api`](crate::DockerError::Api).
    pub async fn do_request(&self, mut opts: RequestOptions) -> Result<Response<Body>> {
        opts.path = self.config.versioned_path(&opts.path);
        let resp = self.transport.request(opts).await?;
        check_response(resp).await
    }

    /// Hijack a connection under the API version prefix.
    pub async fn do_raw(&self, mut opts: RequestOptions) -> Result<HijackedConn> {
        opts.path = self.config.versioned_path(&opts.path);
        self.transport.request_raw(opts).await
    }

    /// Check that the daemon is reachable.
    pub async fn ping(&self) -> Result<Ping> {
        let resp = self.do_request(RequestOptions::get("/_ping")).await?;
        Ok(Ping::from_headers(resp.headers()))
    }

    /// Handle for the container with this id or name.
    ///
    /// Nothing is sent to the daemon.
    pub fn container(&self, id: impl Into<String>) -> Container {
        Container::new(self.clone(), id.into())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("config", &self.config).finish()
    }
}
