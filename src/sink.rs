//! Hand-off of the merged run result.
//!
//! The orchestrator calls [`ResultSink::persist`] once, after every task has
//! finished and before the terminal event. A sink error is fatal to the run.

use crate::core::Aggregate;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("{0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(&self, aggregate: &Aggregate) -> Result<(), SinkError>;
}

/// Accepts every aggregate without storing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl ResultSink for NoopSink {
    async fn persist(&self, _aggregate: &Aggregate) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Adapts a synchronous closure.
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(&Aggregate) -> Result<(), SinkError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> ResultSink for FnSink<F>
where
    F: Fn(&Aggregate) -> Result<(), SinkError> + Send + Sync,
{
    async fn persist(&self, aggregate: &Aggregate) -> Result<(), SinkError> {
        (self.f)(aggregate)
    }
}

/// Writes the aggregate as pretty-printed JSON, replacing the file.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn persist(&self, aggregate: &Aggregate) -> Result<(), SinkError> {
        let content = serde_json::to_string_pretty(aggregate)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}
