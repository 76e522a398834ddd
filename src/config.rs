//! Client configuration.
//!
//! Defaults match the Docker CLI: the local daemon socket, no pinned API
//! version, no connect timeout. [`ClientConfig::from_env`] reads the usual
//! environment variables on top of the defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::pipe::DEFAULT_PIPE_CAPACITY;
use crate::transport::{Dialer, DockerCliConfig, TlsConfig, DEFAULT_DOCKER_HOST};

/// Environment variable holding the daemon address.
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

/// Environment variable pinning the API version.
pub const DOCKER_API_VERSION_ENV: &str = "DOCKER_API_VERSION";

/// Environment variable that turns on TLS with certificate checks.
pub const DOCKER_TLS_VERIFY_ENV: &str = "DOCKER_TLS_VERIFY";

/// Environment variable naming the directory with `ca.pem`, `cert.pem` and
/// `key.pem`. Defaults to `~/.docker`.
pub const DOCKER_CERT_PATH_ENV: &str = "DOCKER_CERT_PATH";

/// Settings used to build a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Daemon address, `unix:///path` or `tcp://host:port`.
    pub host: String,
    /// API version prefixed to every path as `/v<version>`.
    pub api_version: Option<String>,
    /// Limit for connecting and upgrading. Hijacked streams have none.
    pub timeout: Option<Duration>,
    /// Chunks buffered per attach output pipe.
    pub pipe_capacity: usize,
    /// Reach the daemon through `docker system dial-stdio` instead of `host`.
    pub docker_cli: Option<DockerCliConfig>,
    /// Secure a `tcp://` host with TLS.
    pub tls: Option<TlsConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DOCKER_HOST.to_string(),
            api_version: None,
            timeout: None,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            docker_cli: None,
            tls: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `DOCKER_HOST`, `DOCKER_API_VERSION`,
    /// `DOCKER_TLS_VERIFY` and `DOCKER_CERT_PATH`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(host) = lookup(DOCKER_HOST_ENV).filter(|h| !h.is_empty()) {
            config.host = host;
        }
        config.api_version = lookup(DOCKER_API_VERSION_ENV)
            .map(|v| v.trim_start_matches('v').to_string())
            .filter(|v| !v.is_empty());

        if lookup(DOCKER_TLS_VERIFY_ENV).map_or(false, |v| !v.is_empty()) {
            let dir = match lookup(DOCKER_CERT_PATH_ENV).filter(|p| !p.is_empty()) {
                Some(path) => PathBuf::from(path),
                None => lookup("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_default()
                    .join(".docker"),
            };
            config.tls = Some(TlsConfig::from_cert_path(dir));
        }

        // Fail early on a host we cannot dial.
        config.dialer()?;
        Ok(config)
    }

    /// The dialer these settings describe.
    pub fn dialer(&self) -> Result<Dialer> {
        if let Some(cli) = &self.docker_cli {
            return Ok(Dialer::DockerCli(cli.clone()));
        }
        let dialer = Dialer::from_host(&self.host)?;
        match &self.tls {
            Some(tls) => dialer.with_tls(tls.clone()),
            None => Ok(dialer),
        }
    }

    /// Prefix `path` with the configured API version.
    pub fn versioned_path(&self, path: &str) -> String {
        match &self.api_version {
            Some(version) => format!("/v{version}{path}"),
            None => path.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DockerError;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "unix:///var/run/docker.sock");
        assert!(config.api_version.is_none());
        assert!(config.timeout.is_none());
        assert_eq!(config.pipe_capacity, DEFAULT_PIPE_CAPACITY);
    }

    #[test]
    fn test_from_env_values() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("DOCKER_HOST", "tcp://10.0.0.5:2375"),
            ("DOCKER_API_VERSION", "1.43"),
        ]))
        .unwrap();
        assert_eq!(config.host, "tcp://10.0.0.5:2375");
        assert_eq!(config.api_version.as_deref(), Some("1.43"));
        assert_eq!(config.dialer().unwrap(), Dialer::Tcp("10.0.0.5:2375".into()));
    }

    #[test]
    fn test_from_env_empty_uses_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[("DOCKER_HOST", "")])).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_from_env_rejects_bad_host() {
        let err = ClientConfig::from_lookup(lookup(&[("DOCKER_HOST", "ssh://me@box")])).unwrap_err();
        assert!(matches!(err, DockerError::UnsupportedHost(_)));
    }

    #[test]
    fn test_from_env_tls_verify() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("DOCKER_HOST", "tcp://10.0.0.5:2376"),
            ("DOCKER_TLS_VERIFY", "1"),
            ("DOCKER_CERT_PATH", "/etc/docker/certs"),
        ]))
        .unwrap();
        let tls = TlsConfig::from_cert_path("/etc/docker/certs");
        assert_eq!(config.tls.as_ref(), Some(&tls));
        assert_eq!(
            config.dialer().unwrap(),
            Dialer::Tls {
                addr: "10.0.0.5:2376".to_string(),
                tls,
            }
        );
    }

    #[test]
    fn test_from_env_cert_path_defaults_to_home() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("DOCKER_HOST", "tcp://10.0.0.5:2376"),
            ("DOCKER_TLS_VERIFY", "1"),
            ("HOME", "/home/me"),
        ]))
        .unwrap();
        assert_eq!(config.tls, Some(TlsConfig::from_cert_path("/home/me/.docker")));
    }

    #[test]
    fn test_from_env_tls_needs_tcp_host() {
        let err = ClientConfig::from_lookup(lookup(&[("DOCKER_TLS_VERIFY", "1")])).unwrap_err();
        assert!(matches!(err, DockerError::UnsupportedHost(_)));
    }

    #[test]
    fn test_from_env_without_tls_verify_is_plain_tcp() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("DOCKER_HOST", "tcp://10.0.0.5:2375"),
            ("DOCKER_TLS_VERIFY", ""),
            ("DOCKER_CERT_PATH", "/etc/docker/certs"),
        ]))
        .unwrap();
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_versioned_path() {
        let mut config = ClientConfig::default();
        assert_eq!(config.versioned_path("/_ping"), "/_ping");
        config.api_version = Some("1.41".to_string());
        assert_eq!(config.versioned_path("/_ping"), "/v1.41/_ping");
    }

    #[test]
    fn test_docker_cli_overrides_host() {
        let config = ClientConfig {
            docker_cli: Some(DockerCliConfig::default()),
            ..Default::default()
        };
        assert!(matches!(config.dialer().unwrap(), Dialer::DockerCli(_)));
    }
}
