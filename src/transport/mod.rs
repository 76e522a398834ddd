//! Transport module - getting requests to the daemon.
//!
//! Provides:
//! - [`Dialer`]: unix socket, TCP, TLS and `docker system dial-stdio` connections
//! - [`TlsConfig`]: certificates for TLS daemons
//! - [`Transport`]: the request / hijack seam used by the client
//! - [`HttpTransport`]: hyper-based implementation
//! - [`HijackedConn`]: raw stream left over after a protocol upgrade

mod dial;
mod hijack;
mod http;
mod response;
mod tls;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE, HOST, UPGRADE};
use hyper::{Method, Request, Response};
use serde::Serialize;

use crate::error::{DockerError, Result};

pub use dial::{
    BoxedConnection, Connection, Dialer, DockerCliConfig, StdioConn, DEFAULT_DOCKER_HOST,
    DEFAULT_UNIX_SOCKET,
};
pub use hijack::{HijackedConn, HijackedReader, HijackedWriter};
pub use http::HttpTransport;
pub use response::{check_response, error_from_response, read_json, DEFAULT_RESPONSE_LIMIT};
pub use tls::{TlsConfig, CA_CERT_FILE, CLIENT_CERT_FILE, CLIENT_KEY_FILE};

/// Response body type returned by transports.
pub type Body = UnsyncBoxBody<Bytes, DockerError>;

/// Default upgrade protocol token.
pub const DEFAULT_UPGRADE_PROTOCOL: &str = "tcp";

/// Wrap bytes as a response body.
pub fn full_body(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Carries requests to the daemon.
///
/// `request` returns a normal HTTP response; `request_raw` performs a
/// protocol upgrade and returns the raw connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the response.
    ///
    /// Implementations do not check the status code.
    async fn request(&self, opts: RequestOptions) -> Result<Response<Body>>;

    /// Send an upgrade request and hijack the connection on `101`.
    async fn request_raw(&self, opts: RequestOptions) -> Result<HijackedConn>;
}

/// Description of one request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    /// Absolute path, already versioned.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Protocol token sent in the `Upgrade` header by `request_raw`.
    pub upgrade: String,
}

impl RequestOptions {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            upgrade: DEFAULT_UPGRADE_PROTOCOL.to_string(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append a boolean query parameter as `true` / `false`.
    pub fn query_bool(self, key: impl Into<String>, value: bool) -> Self {
        self.query(key, value.to_string())
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a raw body with its content type.
    pub fn body(mut self, body: impl Into<Bytes>, content_type: &str) -> Self {
        self.body = Some(body.into());
        self.header(CONTENT_TYPE.as_str(), content_type)
    }

    /// Set a JSON body.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self.body(body, "application/json"))
    }

    /// Set the protocol token for `request_raw` (e.g. `h2c`).
    pub fn upgrade(mut self, protocol: impl Into<String>) -> Self {
        self.upgrade = protocol.into();
        self
    }

    /// Path with the encoded query string.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        format!("{}?{}", self.path, query)
    }

    pub(crate) fn build(&self, authority: &str, upgrade: bool) -> Result<Request<Full<Bytes>>> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.path_and_query())
            .header(HOST, authority);

        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if upgrade {
            let token = HeaderValue::from_str(&self.upgrade).map_err(|_| {
                DockerError::InvalidInput(format!("invalid upgrade protocol {:?}", self.upgrade))
            })?;
            builder = builder
                .header(CONNECTION, HeaderValue::from_static("Upgrade"))
                .header(UPGRADE, token);
        }

        let body = self.body.clone().unwrap_or_default();
        Ok(builder.body(Full::new(body))?)
    }
}
