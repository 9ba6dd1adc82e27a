//! Orchestration layer.
//!
//! This module provides the generation backend capability and its Claude
//! Code and OpenAI-compatible implementations, the per-task retry policy,
//! the shared result cache, and the orchestrator that runs task nodes
//! concurrently.

pub mod backend;
pub mod cache;
mod claude;
mod openai;
pub mod retry;
mod scheduler;

pub use backend::{
    generate_text, BackendError, ChunkStream, GenerationBackend, GenerationMode,
    GenerationOptions, GenerationRequest,
};
pub use cache::ResultCache;
pub use claude::{ClaudeBackend, ClaudeReply};
pub use openai::OpenAiBackend;
pub use retry::{run_with_retry, AttemptFailure, RetryOutcome, RetryPolicy, RetryStatus};
pub use scheduler::{Orchestrator, RunOptions};
