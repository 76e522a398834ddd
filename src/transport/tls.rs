//! TLS settings for `tcp://` daemons.
//!
//! Mirrors the Docker CLI: `DOCKER_TLS_VERIFY` turns TLS on and
//! `DOCKER_CERT_PATH` names a directory with `ca.pem`, `cert.pem` and
//! `key.pem`. Certificates are loaded when a connection is dialed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use super::dial::Connection;
use crate::error::{DockerError, Result};

/// CA bundle file name inside a cert directory.
pub const CA_CERT_FILE: &str = "ca.pem";
/// Client certificate file name inside a cert directory.
pub const CLIENT_CERT_FILE: &str = "cert.pem";
/// Client key file name inside a cert directory.
pub const CLIENT_KEY_FILE: &str = "key.pem";

/// How to secure a TCP connection.
///
/// Without `ca_cert` the server is checked against the bundled web PKI
/// roots. Client authentication needs both `client_cert` and `client_key`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM bundle of trusted CAs.
    pub ca_cert: Option<PathBuf>,
    /// PEM client certificate chain.
    pub client_cert: Option<PathBuf>,
    /// PEM private key for `client_cert`.
    pub client_key: Option<PathBuf>,
    /// Name to verify the server certificate against. Defaults to the host
    /// part of the address.
    pub server_name: Option<String>,
}

impl TlsConfig {
    /// Use `ca.pem`, `cert.pem` and `key.pem` from `dir`.
    pub fn from_cert_path(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            ca_cert: Some(dir.join(CA_CERT_FILE)),
            client_cert: Some(dir.join(CLIENT_CERT_FILE)),
            client_key: Some(dir.join(CLIENT_KEY_FILE)),
            server_name: None,
        }
    }

    /// Verify the server certificate against `name`.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Read the certificate files and build a connector.
    pub(crate) async fn connector(&self) -> Result<TlsConnector> {
        let mut roots = RootCertStore::empty();
        match &self.ca_cert {
            Some(path) => {
                for cert in load_certs(path).await? {
                    roots.add(cert)?;
                }
            }
            None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        }

        let builder = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots);

        let config = match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => {
                builder.with_client_auth_cert(load_certs(cert).await?, load_key(key).await?)?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(DockerError::InvalidInput(
                    "TLS client certificate and key must be set together".to_string(),
                ))
            }
        };
        Ok(TlsConnector::from(Arc::new(config)))
    }

    /// Server name to verify for a `host:port` address.
    pub(crate) fn server_name_for(&self, addr: &str) -> Result<ServerName<'static>> {
        let name = match &self.server_name {
            Some(name) => name.clone(),
            None => host_of(addr).to_string(),
        };
        ServerName::try_from(name.clone())
            .map_err(|e| DockerError::InvalidInput(format!("TLS server name {name:?}: {e}")))
    }
}

/// Open a TLS session to `addr`.
pub(crate) async fn connect(addr: &str, config: &TlsConfig) -> Result<TlsStream<TcpStream>> {
    let connector = config.connector().await?;
    let server_name = config.server_name_for(addr)?;

    let tcp = TcpStream::connect(addr).await?;
    tcp.set_nodelay(true)?;
    let stream = connector.connect(server_name, tcp).await?;
    tracing::debug!(addr, "TLS session established");
    Ok(stream)
}

// Shutdown sends close_notify, then shuts the TCP write side. Reads keep
// working, so the daemon sees stdin end while output still arrives.
impl Connection for TlsStream<TcpStream> {
    fn supports_close_write(&self) -> bool {
        true
    }
}

fn host_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

async fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = read_pem(path).await?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice()).collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(DockerError::InvalidInput(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

async fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = read_pem(path).await?;
    rustls_pemfile::private_key(&mut pem.as_slice())?
        .ok_or_else(|| DockerError::InvalidInput(format!("no private key in {}", path.display())))
}

async fn read_pem(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        DockerError::Io(std::io::Error::new(
            e.kind(),
            format!("reading {}: {e}", path.display()),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    struct TestPki {
        dir: tempfile::TempDir,
        server: rustls::ServerConfig,
    }

    /// A self-signed `localhost` certificate written as `ca.pem`.
    fn test_pki() -> TestPki {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CA_CERT_FILE), cert.pem()).unwrap();

        let key = PrivateKeyDer::Pkcs8(key_pair.serialize_der().into());
        let server = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)
        .unwrap();
        TestPki { dir, server }
    }

    fn server_only(dir: &Path) -> TlsConfig {
        TlsConfig {
            ca_cert: Some(dir.join(CA_CERT_FILE)),
            ..Default::default()
        }
        .server_name("localhost")
    }

    #[test]
    fn test_from_cert_path_uses_docker_file_names() {
        let config = TlsConfig::from_cert_path("/home/me/.docker");
        assert_eq!(config.ca_cert, Some(PathBuf::from("/home/me/.docker/ca.pem")));
        assert_eq!(config.client_cert, Some(PathBuf::from("/home/me/.docker/cert.pem")));
        assert_eq!(config.client_key, Some(PathBuf::from("/home/me/.docker/key.pem")));
    }

    #[test]
    fn test_server_name_defaults_to_host() {
        let config = TlsConfig::default();
        assert_eq!(
            config.server_name_for("docker.example.com:2376").unwrap(),
            ServerName::try_from("docker.example.com").unwrap()
        );
        assert!(matches!(
            config.server_name_for("10.0.0.5:2376").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(
            config.server_name_for("[::1]:2376").unwrap(),
            ServerName::IpAddress(_)
        ));

        let named = config.server_name("daemon.internal");
        assert_eq!(
            named.server_name_for("10.0.0.5:2376").unwrap(),
            ServerName::try_from("daemon.internal").unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_ca_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TlsConfig::from_cert_path(dir.path()).connector().await.err().expect("expected connector error");
        match err {
            DockerError::Io(e) => assert!(e.to_string().contains("ca.pem")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ca_file_without_certificates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CA_CERT_FILE), "not a certificate\n").unwrap();
        let err = server_only(dir.path()).connector().await.err().expect("expected connector error");
        assert!(matches!(err, DockerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_client_cert_without_key() {
        let pki = test_pki();
        let config = TlsConfig {
            client_cert: Some(pki.dir.path().join(CA_CERT_FILE)),
            ..server_only(pki.dir.path())
        };
        let err = config.connector().await.err().expect("expected connector error");
        assert!(matches!(err, DockerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_connect_and_half_close() {
        let pki = test_pki();
        let acceptor = TlsAcceptor::from(Arc::new(pki.server));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut tls = acceptor.accept(tcp).await.unwrap();
            let mut input = Vec::new();
            tls.read_to_end(&mut input).await.unwrap();
            tls.write_all(b"got ").await.unwrap();
            tls.write_all(&input).await.unwrap();
            tls.shutdown().await.unwrap();
        });

        let mut conn = connect(&addr, &server_only(pki.dir.path())).await.unwrap();
        assert!(conn.supports_close_write());
        conn.write_all(b"stdin").await.unwrap();
        conn.shutdown().await.unwrap();

        let mut reply = Vec::new();
        conn.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"got stdin");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_untrusted_server_is_rejected() {
        let pki = test_pki();
        let other = tempfile::tempdir().unwrap();
        let rcgen::CertifiedKey { cert, .. } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        std::fs::write(other.path().join(CA_CERT_FILE), cert.pem()).unwrap();

        let acceptor = TlsAcceptor::from(Arc::new(pki.server));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            if let Ok((tcp, _)) = listener.accept().await {
                let _ = acceptor.accept(tcp).await;
            }
        });

        let err = connect(&addr, &server_only(other.path())).await.unwrap_err();
        assert!(matches!(err, DockerError::Io(_)), "{err:?}");
    }
}
