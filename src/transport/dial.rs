//! Connection establishment to the Docker daemon.
//!
//! - Unix: Unix Domain Socket (default `/var/run/docker.sock`)
//! - TCP: plain `tcp://host:port`
//! - TLS: `https://host:port`, or `tcp://` with a [`TlsConfig`]
//! - Docker CLI: `docker system dial-stdio` subprocess used as a proxy
//!
//! # Example
//!
//! ```ignore
//! use dockwire_client::transport::Dialer;
//!
//! let dialer = Dialer::from_host("unix:///var/run/docker.sock")?;
//! let conn = dialer.dial().await?;
//! ```

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, DuplexStream, ReadBuf};
use tokio::net::{TcpStream, UnixStream};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use url::Url;

use super::tls::{self, TlsConfig};
use crate::error::{DockerError, Result};

/// Default daemon socket.
pub const DEFAULT_UNIX_SOCKET: &str = "/var/run/docker.sock";

/// Default `DOCKER_HOST` value.
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// A raw byte stream to the daemon.
///
/// `supports_close_write` reports whether `poll_shutdown` closes only the
/// write direction while reads keep working.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    fn supports_close_write(&self) -> bool {
        false
    }
}

/// Type-erased connection.
pub type BoxedConnection = Box<dyn Connection>;

impl Connection for UnixStream {
    fn supports_close_write(&self) -> bool {
        true
    }
}

impl Connection for TcpStream {
    fn supports_close_write(&self) -> bool {
        true
    }
}

impl Connection for DuplexStream {
    fn supports_close_write(&self) -> bool {
        true
    }
}

impl Connection for BoxedConnection {
    fn supports_close_write(&self) -> bool {
        (**self).supports_close_write()
    }
}

/// How to reach the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialer {
    /// Unix socket path.
    Unix(PathBuf),
    /// `host:port` for a plain TCP connection.
    Tcp(String),
    /// `host:port` secured with TLS.
    Tls { addr: String, tls: TlsConfig },
    /// `docker system dial-stdio` proxy.
    DockerCli(DockerCliConfig),
}

impl Default for Dialer {
    fn default() -> Self {
        Self::Unix(PathBuf::from(DEFAULT_UNIX_SOCKET))
    }
}

impl Dialer {
    /// Parse a `DOCKER_HOST` style address.
    ///
    /// Accepts `unix:///path/to/socket`, `tcp://host:port` and
    /// `https://host:port`. The last one verifies the daemon against the
    /// web PKI roots; use [`with_tls`](Self::with_tls) for client
    /// certificates or a private CA.
    pub fn from_host(host: &str) -> Result<Self> {
        let url = Url::parse(host).map_err(|e| DockerError::UnsupportedHost(format!("{host}: {e}")))?;

        match url.scheme() {
            "unix" => {
                let path = url.path();
                if path.is_empty() || path == "/" {
                    return Err(DockerError::UnsupportedHost(format!(
                        "{host}: missing socket path"
                    )));
                }
                Ok(Self::Unix(PathBuf::from(path)))
            }
            "tcp" => Ok(Self::Tcp(host_port(host, &url)?)),
            "https" => Ok(Self::Tls {
                addr: host_port(host, &url)?,
                tls: TlsConfig::default(),
            }),
            other => Err(DockerError::UnsupportedHost(format!(
                "{host}: scheme {other:?} is not supported"
            ))),
        }
    }

    /// Secure a TCP dialer with `tls`.
    ///
    /// A TLS dialer gets its settings replaced; other dialers fail with
    /// `UnsupportedHost`.
    pub fn with_tls(self, tls: TlsConfig) -> Result<Self> {
        match self {
            Self::Tcp(addr) | Self::Tls { addr, .. } => Ok(Self::Tls { addr, tls }),
            other => Err(DockerError::UnsupportedHost(format!(
                "TLS needs a tcp:// host, not {other:?}"
            ))),
        }
    }

    /// Value for the HTTP `Host` header.
    pub fn authority(&self) -> &str {
        match self {
            Self::Tcp(addr) | Self::Tls { addr, .. } => addr,
            Self::Unix(_) | Self::DockerCli(_) => "docker",
        }
    }

    /// Open a new connection.
    pub async fn dial(&self) -> Result<BoxedConnection> {
        match self {
            Self::Unix(path) => {
                let stream = UnixStream::connect(path).await?;
                Ok(Box::new(stream))
            }
            Self::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            Self::Tls { addr, tls } => Ok(Box::new(tls::connect(addr, tls).await?)),
            Self::DockerCli(config) => Ok(Box::new(StdioConn::spawn(config)?)),
        }
    }
}

fn host_port(host: &str, url: &Url) -> Result<String> {
    let hostname = url
        .host_str()
        .ok_or_else(|| DockerError::UnsupportedHost(format!("{host}: missing host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| DockerError::UnsupportedHost(format!("{host}: missing port")))?;
    Ok(format!("{hostname}:{port}"))
}

/// Settings for the `docker system dial-stdio` proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerCliConfig {
    /// CLI binary (default `docker`).
    pub program: PathBuf,
    /// Extra environment, e.g. `DOCKER_CONTEXT`. Added to the inherited one.
    pub env: Vec<(String, String)>,
    /// Forward the CLI's stderr lines to `tracing` (default true).
    pub log_stderr: bool,
}

impl Default for DockerCliConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("docker"),
            env: Vec::new(),
            log_stderr: true,
        }
    }
}

/// Connection proxied through a `docker system dial-stdio` child process.
///
/// Shutting down the write side closes the child's stdin, which the CLI
/// forwards as a half-close.
pub struct StdioConn {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
}

impl StdioConn {
    /// Start the CLI proxy.
    pub fn spawn(config: &DockerCliConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.program);
        cmd.args(["system", "dial-stdio"])
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if config.log_stderr {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            DockerError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to start docker dial-stdio: {e}"),
            ))
        })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DockerError::Unsupported("dial-stdio child has no stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(target: "dockwire_client::dial_stdio", "{}", line);
                }
            });
        }

        tracing::debug!(pid = ?child.id(), "started docker dial-stdio proxy");
        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }

    /// Process id of the proxy, if still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

impl Connection for StdioConn {
    fn supports_close_write(&self) -> bool {
        true
    }
}

impl AsyncRead for StdioConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for StdioConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_write(cx, buf),
            None => Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        if let Some(stdin) = self.stdin.as_mut() {
            std::task::ready!(Pin::new(stdin).poll_shutdown(cx))?;
        }
        // Dropping the handle closes the pipe.
        self.stdin = None;
        Poll::Ready(Ok(()))
    }
}
