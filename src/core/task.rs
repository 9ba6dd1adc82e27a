//! Task node data model.
//!
//! A node is one generation call plus everything needed to turn its output
//! into an accepted result: an extractor profile, an optional validator, a
//! retry policy, an optional cache slot and an optional spawn rule that
//! derives follow-up nodes from the result.

use crate::core::validate::Validator;
use crate::extract::{ExtractProfile, Extractor};
use crate::orchestration::backend::{generate_text, GenerationBackend, GenerationRequest};
use crate::orchestration::cache::ResultCache;
use crate::orchestration::retry::{AttemptFailure, RetryPolicy, RetryStatus};
use crate::{rlog, rlog_debug, rlog_warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a task node.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Node lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed {
        error: String,
    },
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::Succeeded => write!(f, "succeeded"),
            TaskState::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Derives follow-up nodes from a succeeded node's result.
pub type SpawnRule = Box<dyn FnOnce(&Value) -> Vec<TaskNode> + Send>;

struct CacheSlot {
    cache: ResultCache,
    key: String,
}

pub struct TaskNode {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub request: GenerationRequest,
    pub extractor: Extractor,
    pub validator: Option<Validator>,
    pub retry: RetryPolicy,
    /// Accepted result; `None` until succeeded and on failure.
    pub result: Option<Value>,
    /// The result is the retry fallback rather than generated output.
    pub degraded: bool,
    /// Backend calls made; zero for a cache hit.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    spawn: Option<SpawnRule>,
    cache: Option<CacheSlot>,
}

impl TaskNode {
    pub fn new(name: &str, request: GenerationRequest) -> Self {
        Self {
            id: TaskId::new(),
            name: name.to_string(),
            state: TaskState::Pending,
            request,
            extractor: Extractor::default(),
            validator: None,
            retry: RetryPolicy::default(),
            result: None,
            degraded: false,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            spawn: None,
            cache: None,
        }
    }

    pub fn with_profile(mut self, profile: ExtractProfile) -> Self {
        self.extractor = Extractor::new(profile);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Accept `fallback` as a degraded result when output stays malformed
    /// or invalid.
    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.retry = self.retry.with_fallback(fallback);
        self
    }

    pub fn with_spawn<F>(mut self, rule: F) -> Self
    where
        F: FnOnce(&Value) -> Vec<TaskNode> + Send + 'static,
    {
        self.spawn = Some(Box::new(rule));
        self
    }

    /// Serve a fresh cached value instead of generating, and store accepted
    /// results under `key`.
    pub fn with_cache(mut self, cache: ResultCache, key: impl Into<String>) -> Self {
        self.cache = Some(CacheSlot {
            cache,
            key: key.into(),
        });
        self
    }

    pub fn has_spawn_rule(&self) -> bool {
        self.spawn.is_some()
    }

    /// Run the spawn rule against the result. Yields nodes at most once and
    /// only for a succeeded node.
    pub fn spawn(&mut self) -> Vec<TaskNode> {
        if self.state != TaskState::Succeeded {
            return Vec::new();
        }
        match (self.spawn.take(), self.result.as_ref()) {
            (Some(rule), Some(result)) => rule(result),
            _ => Vec::new(),
        }
    }

    pub fn start(&mut self) {
        self.state = TaskState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self, result: Value, degraded: bool) {
        self.state = TaskState::Succeeded;
        self.result = Some(result);
        self.degraded = degraded;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = TaskState::Failed {
            error: error.into(),
        };
        self.result = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, TaskState::Succeeded | TaskState::Failed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            TaskState::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Drive the node to a terminal state against `backend`.
    ///
    /// A valid attempt succeeds. Exhausted retries succeed degraded with the
    /// fallback when one is configured and the last failure was malformed or
    /// invalid output; otherwise the node fails.
    pub async fn execute(mut self, backend: &dyn GenerationBackend) -> TaskNode {
        self.start();
        let label = format!("{}:{}", self.name, self.id.short());

        if let Some(slot) = &self.cache {
            if let Some(value) = slot.cache.get(&slot.key) {
                rlog_debug!("[{}] cache hit for '{}'", label, slot.key);
                self.succeed(value, false);
                return self;
            }
        }

        rlog!("[{}] generating via {}", label, backend.name());
        let request = &self.request;
        let validator = self.validator.clone();
        let outcome = self
            .retry
            .execute(
                &label,
                move || generate_text(backend, request),
                &self.extractor,
                move |value| validator.as_ref().map_or(true, |v| v.check(value)),
            )
            .await;
        self.attempts = outcome.attempts;

        match outcome.status {
            RetryStatus::Valid => {
                if let Some(slot) = &self.cache {
                    slot.cache.insert(&slot.key, outcome.value.clone());
                }
                self.succeed(outcome.value, false);
            }
            RetryStatus::Exhausted { last_failure } => match last_failure {
                AttemptFailure::Malformed { .. } | AttemptFailure::Validation
                    if self.retry.has_fallback() =>
                {
                    rlog_warn!("[{}] using fallback after {}", label, last_failure);
                    self.succeed(outcome.value, true);
                }
                failure => {
                    let message = format!(
                        "failed after {} attempts: {}",
                        outcome.attempts, failure
                    );
                    rlog_warn!("[{}] {}", label, message);
                    self.fail(message);
                }
            },
        }
        self
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("result", &self.result)
            .field("degraded", &self.degraded)
            .field("attempts", &self.attempts)
            .field("has_spawn_rule", &self.spawn.is_some())
            .finish()
    }
}
