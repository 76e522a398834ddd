//! hyper-based [`Transport`] implementation.
//!
//! Every request dials a fresh connection and runs an HTTP/1.1 handshake on
//! it. Upgrade requests drive the connection with `with_upgrades()` so the
//! socket can be taken back once the daemon answers `101`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::{Response, StatusCode};
use hyper_util::rt::TokioIo;

use super::dial::{BoxedConnection, Dialer};
use super::hijack::HijackedConn;
use super::response::status_and_message;
use super::{Body, RequestOptions, Transport};
use crate::error::{ApiErrorKind, DockerError, Result};

/// Transport that speaks HTTP/1.1 over a [`Dialer`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    dialer: Dialer,
    /// Applies to dial, handshake and response head (or upgrade) only.
    timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(dialer: Dialer) -> Self {
        Self {
            dialer,
            timeout: None,
        }
    }

    /// Set the connect/upgrade timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dialer(&self) -> &Dialer {
        &self.dialer
    }

    async fn connect(&self, upgrades: bool) -> Result<SendRequest<Full<Bytes>>> {
        let conn = self.dialer.dial().await?;
        let (sender, connection) = http1::handshake(TokioIo::new(conn)).await?;

        if upgrades {
            tokio::spawn(async move {
                if let Err(e) = connection.with_upgrades().await {
                    tracing::debug!(error = %e, "upgrade connection ended with error");
                }
            });
        } else {
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::debug!(error = %e, "connection ended with error");
                }
            });
        }
        Ok(sender)
    }

    async fn hijack(&self, opts: RequestOptions) -> Result<HijackedConn> {
        let mut sender = self.connect(true).await?;
        let req = opts.build(self.dialer.authority(), true)?;
        let resp = sender.send_request(req).await?;

        if resp.status() != StatusCode::SWITCHING_PROTOCOLS {
            let resp = resp.map(|body| body.map_err(DockerError::from).boxed_unsync());
            let (status, message) = status_and_message(resp).await;
            tracing::debug!(status, %message, path = %opts.path, "upgrade rejected");
            return Err(DockerError::UpgradeRejected {
                protocol: opts.upgrade,
                status,
                kind: ApiErrorKind::from_status(status),
                message,
            });
        }

        let upgraded = hyper::upgrade::on(resp).await?;
        match upgraded.downcast::<TokioIo<BoxedConnection>>() {
            Ok(parts) => {
                tracing::debug!(
                    path = %opts.path,
                    buffered = parts.read_buf.len(),
                    "connection hijacked"
                );
                Ok(HijackedConn::new(parts.io.into_inner(), parts.read_buf))
            }
            Err(upgraded) => {
                tracing::warn!(path = %opts.path, "could not unwrap upgraded connection");
                Ok(HijackedConn::new(Box::new(TokioIo::new(upgraded)), Bytes::new()))
            }
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Dialer::default())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, opts: RequestOptions) -> Result<Response<Body>> {
        let send = async {
            let mut sender = self.connect(false).await?;
            let req = opts.build(self.dialer.authority(), false)?;
            tracing::debug!(method = %opts.method, path = %opts.path, "sending request");
            Ok::<_, DockerError>(sender.send_request(req).await?)
        };
        let resp = with_timeout(self.timeout, send).await?;
        Ok(resp.map(|body| body.map_err(DockerError::from).boxed_unsync()))
    }

    async fn request_raw(&self, opts: RequestOptions) -> Result<HijackedConn> {
        tracing::debug!(method = %opts.method, path = %opts.path, upgrade = %opts.upgrade, "hijacking connection");
        with_timeout(self.timeout, self.hijack(opts)).await
    }
}

async fn with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| DockerError::Timeout)?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_elapses() {
        let result: Result<()> = with_timeout(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(DockerError::Timeout)));
    }

    #[tokio::test]
    async fn test_no_timeout() {
        let result = with_timeout(None, async { Ok(7) }).await.unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test]
    async fn test_dial_failure_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let transport = HttpTransport::new(Dialer::Unix(dir.path().join("missing.sock")));
        let err = transport
            .request(RequestOptions::get("/_ping"))
            .await
            .unwrap_err();
        assert!(matches!(err, DockerError::Io(_)));
    }
}
