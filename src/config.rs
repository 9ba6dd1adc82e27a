use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::orchestration::backend::{
    GenerationBackend, GenerationOptions, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_TEMPERATURE,
    DEFAULT_TIMEOUT_SECS,
};
use crate::orchestration::cache::{ResultCache, DEFAULT_CACHE_TTL_SECS};
use crate::orchestration::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::orchestration::{ClaudeBackend, OpenAiBackend};
use crate::{rlog_debug, Error, Result};

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub attempt_timeout_secs: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Claude,
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// Path to the `claude` binary; looked up on `PATH` when unset.
    pub command: Option<String>,
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Claude,
            command: None,
            base_url: None,
            api_key_env: None,
            model: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_output_tokens() -> u32 {
    DEFAULT_MAX_OUTPUT_TOKENS
}

fn default_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

impl Config {
    pub fn ripple_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".ripple"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::ripple_dir()?.join("ripple.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Missing files yield the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        rlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            rlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        rlog_debug!(
            "Config loaded: backend={:?}, max_attempts={}, cache_ttl={}s",
            config.backend.kind,
            config.retry.max_attempts,
            config.cache.ttl_secs
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let ripple_dir = Self::ripple_dir()?;
        if !ripple_dir.exists() {
            rlog_debug!("Creating ripple directory");
            fs::create_dir_all(&ripple_dir)?;
        }
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        rlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn effective_command(&self) -> &str {
        self.backend.command.as_deref().unwrap_or("claude")
    }

    /// Retry policy for tasks that do not set their own budget.
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.retry.max_attempts);
        match self.retry.attempt_timeout_secs {
            Some(secs) => policy.with_attempt_timeout(Duration::from_secs(secs)),
            None => policy,
        }
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.backend.temperature,
            max_output_tokens: self.backend.max_output_tokens,
            ..GenerationOptions::default()
        }
    }

    pub fn result_cache(&self) -> ResultCache {
        ResultCache::new(Duration::from_secs(self.cache.ttl_secs))
    }

    /// Build the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if `claude` cannot be found on `PATH` or the HTTP
    /// client cannot be built.
    pub fn build_backend(&self) -> Result<Arc<dyn GenerationBackend>> {
        let timeout = Duration::from_secs(self.backend.timeout_secs);
        match self.backend.kind {
            BackendKind::Claude => {
                let backend = match &self.backend.command {
                    Some(command) => ClaudeBackend::with_binary(expand_tilde(command)),
                    None => ClaudeBackend::new()?,
                };
                let backend = backend.with_timeout(timeout);
                Ok(Arc::new(match &self.backend.model {
                    Some(model) => backend.with_model(model),
                    None => backend,
                }))
            }
            BackendKind::OpenAi => {
                let key_env = self
                    .backend
                    .api_key_env
                    .as_deref()
                    .unwrap_or(DEFAULT_API_KEY_ENV);
                let api_key = std::env::var(key_env).ok();
                if api_key.is_none() {
                    rlog_debug!("{} is not set, sending requests without a key", key_env);
                }
                let backend = OpenAiBackend::with_timeout(
                    self.backend.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE_URL),
                    api_key,
                    self.backend.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL),
                    timeout,
                )?;
                Ok(Arc::new(backend))
            }
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
