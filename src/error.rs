use thiserror::Error;

use crate::orchestration::BackendError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Result sink failed: {0}")]
    Sink(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("No home directory")]
    NoHomeDir,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Backend binary not found: {0}")]
    BackendNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
