//! Exec instances.
//!
//! An exec is created with [`Container::exec`](super::Container::exec) and
//! then started either attached, which hijacks the start request, or
//! detached.

use hyper::header::CONTENT_TYPE;
use hyper::Response;
use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::error::{DockerError, Result};
use crate::transport::{read_json, Body, RequestOptions, DEFAULT_RESPONSE_LIMIT};

use super::inspect::ExecInspect;
use super::stdio::{AttachIo, Streams};

/// Options for a new exec instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecConfig {
    pub cmd: Vec<String>,
    pub user: Option<String>,
    pub privileged: bool,
    pub tty: bool,
    /// `KEY=value` entries.
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub detach_keys: Option<String>,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
}

impl ExecConfig {
    /// Run `cmd`, attached to stdout and stderr.
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            attach_stdout: true,
            attach_stderr: true,
            ..Default::default()
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn privileged(mut self, enabled: bool) -> Self {
        self.privileged = enabled;
        self
    }

    pub fn tty(mut self, enabled: bool) -> Self {
        self.tty = enabled;
        self
    }

    pub fn env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn detach_keys(mut self, keys: impl Into<String>) -> Self {
        self.detach_keys = Some(keys.into());
        self
    }

    pub fn attach_stdin(mut self, enabled: bool) -> Self {
        self.attach_stdin = enabled;
        self
    }

    pub fn attach_stdout(mut self, enabled: bool) -> Self {
        self.attach_stdout = enabled;
        self
    }

    pub fn attach_stderr(mut self, enabled: bool) -> Self {
        self.attach_stderr = enabled;
        self
    }

    fn streams(&self) -> Streams {
        Streams {
            stdin: self.attach_stdin,
            stdout: self.attach_stdout,
            stderr: self.attach_stderr,
        }
    }

    pub(crate) fn create_body(&self) -> Result<ExecCreateBody<'_>> {
        if self.cmd.is_empty() {
            return Err(DockerError::InvalidInput("no exec command specified".to_string()));
        }
        Ok(ExecCreateBody {
            attach_stdin: self.attach_stdin,
            attach_stdout: self.attach_stdout,
            attach_stderr: self.attach_stderr,
            detach_keys: self.detach_keys.as_deref(),
            tty: self.tty,
            env: (!self.env.is_empty()).then_some(&self.env[..]),
            cmd: &self.cmd,
            privileged: self.privileged,
            user: self.user.as_deref(),
            working_dir: self.working_dir.as_deref(),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ExecCreateBody<'a> {
    attach_stdin: bool,
    attach_stdout: bool,
    attach_stderr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detach_keys: Option<&'a str>,
    tty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    env: Option<&'a [String]>,
    cmd: &'a [String],
    privileged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    working_dir: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExecCreated {
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecStartBody {
    detach: bool,
    tty: bool,
}

/// A created, not necessarily started, exec instance.
#[derive(Debug, Clone)]
pub struct ExecProcess {
    client: Client,
    id: String,
    tty: bool,
    streams: Streams,
}

impl ExecProcess {
    pub(crate) async fn create(client: Client, container: &str, config: &ExecConfig) -> Result<Self> {
        let body = config.create_body()?;
        let opts = RequestOptions::post(format!("/containers/{container}/exec")).json(&body)?;
        let resp = client.do_request(opts).await?;
        let created: ExecCreated = read_json(expect_json(resp)?, DEFAULT_RESPONSE_LIMIT).await?;
        tracing::debug!(container, exec = %created.id, "exec created");

        Ok(Self {
            client,
            id: created.id,
            tty: config.tty,
            streams: config.streams(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_tty(&self) -> bool {
        self.tty
    }

    /// Start the process and attach to the streams chosen at creation.
    pub async fn start(&self) -> Result<AttachIo> {
        let opts = RequestOptions::post(format!("/exec/{}/start", self.id)).json(&ExecStartBody {
            detach: false,
            tty: self.tty,
        })?;
        let conn = self.client.do_raw(opts).await?;
        tracing::debug!(exec = %self.id, tty = self.tty, "exec started");
        Ok(AttachIo::start(
            conn,
            self.streams,
            self.tty,
            self.client.config().pipe_capacity,
        ))
    }

    /// Start the process without attaching to it.
    pub async fn start_detached(&self) -> Result<()> {
        let opts = RequestOptions::post(format!("/exec/{}/start", self.id)).json(&ExecStartBody {
            detach: true,
            tty: self.tty,
        })?;
        self.client.do_request(opts).await?;
        Ok(())
    }

    pub async fn inspect(&self) -> Result<ExecInspect> {
        let resp = self
            .client
            .do_request(RequestOptions::get(format!("/exec/{}/json", self.id)))
            .await?;
        read_json(resp, DEFAULT_RESPONSE_LIMIT).await
    }

    /// Resize the exec's terminal.
    pub async fn resize(&self, width: u32, height: u32) -> Result<()> {
        let opts = RequestOptions::post(format!("/exec/{}/resize", self.id))
            .query("w", width.to_string())
            .query("h", height.to_string());
        self.client.do_request(opts).await?;
        Ok(())
    }
}

/// Reject a successful response that is not JSON.
fn expect_json(resp: Response<Body>) -> Result<Response<Body>> {
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type.starts_with("application/json") {
        Ok(resp)
    } else {
        Err(DockerError::ContentType(content_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::full_body;

    #[test]
    fn test_empty_command_rejected() {
        let err = ExecConfig::default().create_body().unwrap_err();
        assert!(matches!(err, DockerError::InvalidInput(_)));
    }

    #[test]
    fn test_create_body_json() {
        let config = ExecConfig::new(["sh", "-c", "echo hi"])
            .tty(true)
            .env("A=1")
            .working_dir("/srv");
        let json = serde_json::to_value(config.create_body().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "AttachStdin": false,
                "AttachStdout": true,
                "AttachStderr": true,
                "Tty": true,
                "Env": ["A=1"],
                "Cmd": ["sh", "-c", "echo hi"],
                "Privileged": false,
                "WorkingDir": "/srv",
            })
        );
    }

    #[test]
    fn test_start_body_json() {
        let body = serde_json::to_string(&ExecStartBody {
            detach: false,
            tty: true,
        })
        .unwrap();
        assert_eq!(body, r#"{"Detach":false,"Tty":true}"#);
    }

    #[test]
    fn test_expect_json_content_type() {
        let resp = Response::builder()
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .body(full_body("{}"))
            .unwrap();
        assert!(expect_json(resp).is_ok());

        let resp = Response::builder()
            .header(CONTENT_TYPE, "text/plain")
            .body(full_body("ok"))
            .unwrap();
        let err = expect_json(resp).unwrap_err();
        assert!(matches!(err, DockerError::ContentType(ct) if ct == "text/plain"));
    }
}
