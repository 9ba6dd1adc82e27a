//! The generation capability every task runs against.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Default sampling temperature for structured output.
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Default output budget per call.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8096;

/// Default per-call timeout (5 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Failures of the backend itself, as opposed to malformed output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request rejected: {0}")]
    Request(String),

    #[error("generation cancelled")]
    Cancelled,

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        } else if err.is_status()
            && err.status().map(|s| s.as_u16()) == Some(429)
        {
            BackendError::Quota(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// Selects whether the retry policy calls `generate` or `generate_stream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationMode {
    #[default]
    Blocking,
    Streaming,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Overrides the backend's configured model.
    pub model: Option<String>,
    pub mode: GenerationMode,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            model: None,
            mode: GenerationMode::Blocking,
        }
    }
}

impl GenerationOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn streaming(mut self) -> Self {
        self.mode = GenerationMode::Streaming;
        self
    }
}

/// A prompt plus the options it is generated with.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// A text-generation service. Shared across nodes and runs behind an `Arc`.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short identifier used in log lines.
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, BackendError>;

    /// Incremental generation. The default yields the blocking result as a
    /// single chunk.
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ChunkStream, BackendError> {
        let text = self.generate(prompt, options).await?;
        Ok(Box::pin(futures::stream::iter(vec![Ok(text)])))
    }
}

/// Run `request` against `backend` in its configured mode and return the
/// full text. Streamed chunks are concatenated.
pub async fn generate_text(
    backend: &dyn GenerationBackend,
    request: &GenerationRequest,
) -> Result<String, BackendError> {
    match request.options.mode {
        GenerationMode::Blocking => backend.generate(&request.prompt, &request.options).await,
        GenerationMode::Streaming => {
            let mut stream = backend
                .generate_stream(&request.prompt, &request.options)
                .await?;
            let mut text = String::new();
            while let Some(chunk) = stream.next().await {
                text.push_str(&chunk?);
            }
            Ok(text)
        }
    }
}
