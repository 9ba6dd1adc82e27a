//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted backend with per-prompt latency and replies
//! - Running an orchestrator while collecting its events
//! - Quick task node builders

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use ripple::core::{Aggregate, ProgressEvent, TaskNode};
use ripple::orchestration::{
    BackendError, GenerationBackend, GenerationOptions, GenerationRequest, Orchestrator,
    RunOptions,
};
use ripple::Result;

/// How the scripted backend answers one prompt.
#[derive(Debug, Clone)]
pub struct Script {
    /// Simulated generation latency.
    pub delay: Duration,
    /// Replies in call order; the last one repeats.
    pub replies: Vec<std::result::Result<String, BackendError>>,
}

impl Script {
    pub fn reply(delay_ms: u64, text: &str) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            replies: vec![Ok(text.to_string())],
        }
    }

    pub fn error(delay_ms: u64, err: BackendError) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            replies: vec![Err(err)],
        }
    }

    pub fn sequence(delay_ms: u64, replies: &[&str]) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            replies: replies.iter().map(|r| Ok(r.to_string())).collect(),
        }
    }
}

/// Backend answering from a prompt-keyed script.
///
/// Unknown prompts fail with a request error. Latency is a tokio sleep, so
/// tests run under `start_paused` finish instantly while keeping the
/// relative completion order the delays imply.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, usize>>,
    finished: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, prompt: &str, script: Script) -> Self {
        self.scripts.insert(prompt.to_string(), script);
        self
    }

    /// Number of generate calls seen for `prompt`.
    pub fn calls(&self, prompt: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(prompt)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Prompts in the order their replies were produced.
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> std::result::Result<String, BackendError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(prompt.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let Some(script) = self.scripts.get(prompt) else {
            return Err(BackendError::Request(format!("unscripted prompt: {}", prompt)));
        };
        tokio::time::sleep(script.delay).await;

        self.finished.lock().unwrap().push(prompt.to_string());
        let index = (call - 1).min(script.replies.len().saturating_sub(1));
        script
            .replies
            .get(index)
            .cloned()
            .unwrap_or_else(|| Err(BackendError::Request("empty script".to_string())))
    }
}

/// Node whose prompt equals its name.
pub fn node(name: &str) -> TaskNode {
    TaskNode::new(name, GenerationRequest::new(name))
}

/// Result of a run together with every event it emitted.
pub struct RunReport {
    pub result: Result<Aggregate>,
    pub events: Vec<ProgressEvent>,
}

impl RunReport {
    /// Task names of the non-terminal events, in emission order.
    pub fn task_order(&self) -> Vec<String> {
        self.events
            .iter()
            .filter(|e| !e.is_terminal())
            .filter_map(|e| e.task_name().map(str::to_string))
            .collect()
    }

    pub fn terminal(&self) -> Option<&ProgressEvent> {
        self.events.last().filter(|e| e.is_terminal())
    }

    pub fn aggregate(&self) -> &Aggregate {
        self.result.as_ref().expect("run should succeed")
    }
}

/// Run `seeds` to completion, draining events alongside the run.
pub async fn run_collecting(
    orchestrator: &Orchestrator,
    seeds: Vec<TaskNode>,
    options: RunOptions,
) -> RunReport {
    let (event_tx, mut event_rx) = mpsc::channel(32);
    let (result, events) = tokio::join!(orchestrator.run(seeds, options, event_tx), async {
        let mut events = Vec::new();
        while let Some(event) = event_rx.recv().await {
            events.push(event);
        }
        events
    });
    RunReport { result, events }
}

pub fn orchestrator(backend: &Arc<ScriptedBackend>) -> Orchestrator {
    Orchestrator::new(backend.clone())
}
