//! Attach options.

use crate::transport::RequestOptions;

use super::stdio::Streams;

/// Options for [`Container::attach`](super::Container::attach).
///
/// Defaults: no streams, `stream = true`, no log replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachConfig {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    /// Replay output produced before attaching.
    pub logs: bool,
    /// Keep streaming new output.
    pub stream: bool,
    /// Key sequence that detaches, e.g. `ctrl-p,ctrl-q`.
    pub detach_keys: Option<String>,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            stdin: false,
            stdout: false,
            stderr: false,
            logs: false,
            stream: true,
            detach_keys: None,
        }
    }
}

impl AttachConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdin(mut self, enabled: bool) -> Self {
        self.stdin = enabled;
        self
    }

    pub fn stdout(mut self, enabled: bool) -> Self {
        self.stdout = enabled;
        self
    }

    pub fn stderr(mut self, enabled: bool) -> Self {
        self.stderr = enabled;
        self
    }

    pub fn logs(mut self, enabled: bool) -> Self {
        self.logs = enabled;
        self
    }

    pub fn stream(mut self, enabled: bool) -> Self {
        self.stream = enabled;
        self
    }

    pub fn detach_keys(mut self, keys: impl Into<String>) -> Self {
        self.detach_keys = Some(keys.into());
        self
    }

    /// True if any output stream is requested.
    pub(crate) fn wants_output(&self) -> bool {
        self.stdout || self.stderr
    }

    pub(crate) fn streams(&self) -> Streams {
        Streams {
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }

    pub(crate) fn request(&self, id: &str) -> RequestOptions {
        let mut opts = RequestOptions::post(format!("/containers/{id}/attach"))
            .query_bool("stdin", self.stdin)
            .query_bool("stdout", self.stdout)
            .query_bool("stderr", self.stderr)
            .query_bool("logs", self.logs)
            .query_bool("stream", self.stream);
        if let Some(keys) = &self.detach_keys {
            opts = opts.query("detachKeys", keys.as_str());
        }
        opts
    }
}
