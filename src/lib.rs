pub mod config;
pub mod core;
pub mod error;
pub mod extract;
pub mod log;
pub mod orchestration;
pub mod pipeline;
pub mod sink;
pub mod stream;

pub use error::{Error, Result};
pub use extract::{extract, Extraction, Extractor, ExtractProfile, Strategy};
pub use orchestration::{Orchestrator, RunOptions};
