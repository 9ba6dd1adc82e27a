//! Claude Code headless backend.
//!
//! Runs `claude -p <prompt>` as a child process. Blocking calls use
//! `--output-format json` and read the `result` field; streaming calls use
//! `--output-format text` and forward stdout line by line. Child processes
//! are killed when the call is dropped.

use crate::error::{Error, Result};
use crate::orchestration::backend::{
    BackendError, ChunkStream, GenerationBackend, GenerationOptions, DEFAULT_TIMEOUT_SECS,
};
use crate::{rlog_debug, rlog_trace};
use async_stream::try_stream;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Parsed `--output-format json` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaudeReply {
    pub text: String,
    pub is_error: bool,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawClaudeReply {
    subtype: Option<String>,
    #[serde(default)]
    is_error: bool,
    result: Option<String>,
    error: Option<String>,
    session_id: Option<String>,
    total_cost_usd: Option<f64>,
    duration_ms: Option<u64>,
}

impl ClaudeReply {
    /// Parse the JSON document printed by `claude -p --output-format json`.
    pub fn parse(json_str: &str) -> std::result::Result<Self, serde_json::Error> {
        let raw: RawClaudeReply = serde_json::from_str(json_str.trim())?;
        let is_error = raw.is_error
            || raw.subtype.as_deref().is_some_and(|s| s.starts_with("error"))
            || (raw.result.is_none() && raw.error.is_some());

        let text = if is_error {
            raw.error.or(raw.result).unwrap_or_else(|| "unknown error".to_string())
        } else {
            raw.result.unwrap_or_default()
        };

        Ok(Self {
            text,
            is_error,
            session_id: raw.session_id,
            cost_usd: raw.total_cost_usd,
            duration_ms: raw.duration_ms,
        })
    }
}

/// Map an error reported by the CLI to a backend error kind.
fn classify_error(message: &str) -> BackendError {
    let lower = message.to_lowercase();
    if lower.contains("rate limit") || lower.contains("quota") || lower.contains("429") {
        BackendError::Quota(message.to_string())
    } else if lower.contains("overloaded") || lower.contains("529") {
        BackendError::Unavailable(message.to_string())
    } else {
        BackendError::Request(message.to_string())
    }
}

fn spawn_error(binary: &Path, err: std::io::Error) -> BackendError {
    if err.kind() == std::io::ErrorKind::NotFound {
        BackendError::Unavailable(format!("{} not found", binary.display()))
    } else {
        BackendError::Transport(err.to_string())
    }
}

/// Claude Code CLI backend.
///
/// Temperature and output limits are not CLI flags and are ignored; the
/// `model` option is passed as `--model`.
#[derive(Debug, Clone)]
pub struct ClaudeBackend {
    binary: PathBuf,
    model: Option<String>,
    timeout: Duration,
}

impl ClaudeBackend {
    /// Locate `claude` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendNotFound` if the binary cannot be found.
    pub fn new() -> Result<Self> {
        let binary =
            which::which("claude").map_err(|_| Error::BackendNotFound("claude".to_string()))?;
        Ok(Self::with_binary(binary))
    }

    /// Use a specific binary path (or any program honouring the same flags).
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            model: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Default model when a request does not name one.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self, prompt: &str, output_format: &str, options: &GenerationOptions) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg(output_format)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(model) = options.model.as_ref().or(self.model.as_ref()) {
            cmd.arg("--model").arg(model);
        }
        cmd
    }
}

#[async_trait]
impl GenerationBackend for ClaudeBackend {
    fn name(&self) -> &str {
        "claude"
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> std::result::Result<String, BackendError> {
        let output = tokio::time::timeout(
            self.timeout,
            self.command(prompt, "json", options).output(),
        )
        .await
        .map_err(|_| BackendError::Timeout(self.timeout))?
        .map_err(|err| spawn_error(&self.binary, err))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        rlog_trace!("claude stdout: {}", crate::log::preview(&stdout, 200));

        if let Ok(reply) = ClaudeReply::parse(&stdout) {
            if let Some(cost) = reply.cost_usd {
                rlog_debug!("claude call cost ${:.4}", cost);
            }
            return if reply.is_error {
                Err(classify_error(&reply.text))
            } else {
                Ok(reply.text)
            };
        }

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                format!(
                    "claude exited with code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Err(BackendError::Transport(message));
        }

        // Non-JSON success output is passed through for the extractor.
        Ok(stdout.trim().to_string())
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> std::result::Result<ChunkStream, BackendError> {
        let mut child = self
            .command(prompt, "text", options)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| spawn_error(&self.binary, err))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Transport("claude stdout not captured".to_string()))?;

        let timeout = self.timeout;
        let deadline = tokio::time::Instant::now() + timeout;
        let stream = try_stream! {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = tokio::time::timeout_at(deadline, lines.next_line())
                .await
                .map_err(|_| BackendError::Timeout(timeout))??
            {
                yield format!("{}\n", line);
            }

            let status = tokio::time::timeout_at(deadline, child.wait())
                .await
                .map_err(|_| BackendError::Timeout(timeout))??;
            if !status.success() {
                Err(BackendError::Transport(format!(
                    "claude exited with code {}",
                    status.code().unwrap_or(-1)
                )))?;
            }
        };
        Ok(Box::pin(stream))
    }
}
