//! OpenAI-compatible chat completions backend.

use crate::error::{Error, Result};
use crate::log::preview;
use crate::orchestration::backend::{
    BackendError, ChunkStream, GenerationBackend, GenerationOptions, DEFAULT_TIMEOUT_SECS,
};
use crate::rlog_debug;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;

pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl OpenAiBackend {
    /// `base_url` may be given with or without the trailing `/v1`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: Option<String>, model: &str) -> Result<Self> {
        Self::with_timeout(base_url, api_key, model, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: normalize_base(base_url),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str, options: &GenerationOptions, stream: bool) -> Value {
        let model = options
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.model.as_str());
        json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": options.temperature,
            "max_tokens": options.max_output_tokens,
            "stream": stream,
        })
    }

    async fn send(&self, body: &Value) -> std::result::Result<reqwest::Response, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(url).json(body);
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }
        let response = req.send().await.map_err(|e| self.map_reqwest(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| extract_error(&v))
            .unwrap_or_else(|| preview(&text, 500));
        Err(status_error(status.as_u16(), detail))
    }

    fn map_reqwest(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::from(err)
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> std::result::Result<String, BackendError> {
        let body = self.request_body(prompt, options, false);
        let response = self.send(&body).await?;
        let value: Value = response.json().await.map_err(|e| self.map_reqwest(e))?;

        if let Some(detail) = extract_error(&value) {
            return Err(BackendError::Request(detail));
        }
        if let Some(text) = extract_text(&value) {
            if let Some(reason) = finish_reason(&value) {
                rlog_debug!("completion finished: {}", reason);
            }
            return Ok(text);
        }
        Err(BackendError::Request(format!(
            "no completion content (response: {})",
            preview(&value.to_string(), 500)
        )))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> std::result::Result<ChunkStream, BackendError> {
        let body = self.request_body(prompt, options, true);
        let response = self.send(&body).await?;
        let mut bytes = response.bytes_stream();

        let stream = try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                buffer.extend_from_slice(&chunk?);

                while let Some(pos) = find_frame_end(&buffer) {
                    let frame = String::from_utf8_lossy(&buffer[..pos]).to_string();
                    buffer.drain(..pos + 2);
                    for payload in frame.lines().filter_map(|l| l.strip_prefix("data:")) {
                        let payload = payload.trim();
                        if payload == "[DONE]" {
                            continue;
                        }
                        let Ok(value) = serde_json::from_str::<Value>(payload) else {
                            continue;
                        };
                        if let Some(detail) = extract_error(&value) {
                            Err(BackendError::Request(detail))?;
                        }
                        if let Some(text) = extract_delta(&value) {
                            yield text;
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

fn normalize_base(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    }
}

fn status_error(status: u16, detail: String) -> BackendError {
    match status {
        429 => BackendError::Quota(detail),
        408 | 504 => BackendError::Timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        500..=599 => BackendError::Unavailable(format!("status {}: {}", status, detail)),
        _ => BackendError::Request(format!("status {}: {}", status, detail)),
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn extract_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.get(0)?;
    choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .or_else(|| choice.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

fn extract_delta(value: &Value) -> Option<String> {
    let text = value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;
    (!text.is_empty()).then(|| text.to_string())
}

fn finish_reason(value: &Value) -> Option<&str> {
    value.get("choices")?.get(0)?.get("finish_reason")?.as_str()
}

fn extract_error(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(|e| e.get("message").and_then(Value::as_str).or_else(|| e.as_str()))
        .map(str::to_string)
}
