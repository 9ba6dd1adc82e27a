//! Progress events and the merged result of a run.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Kind of a progress event on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Partial,
    Error,
    Complete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Partial => write!(f, "partial"),
            EventKind::Error => write!(f, "error"),
            EventKind::Complete => write!(f, "complete"),
        }
    }
}

/// One notification pushed to the caller while a run progresses.
///
/// Events are emitted in the order tasks finish. Exactly one terminal event
/// (`Complete`, or a fatal `Error`) closes every run that is not cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ProgressEvent {
    /// A task finished with a result.
    Partial {
        task: String,
        data: Value,
        /// The result is the task's fallback value.
        #[serde(default)]
        degraded: bool,
    },
    /// A task failed, or the run failed when `fatal` is set.
    Error {
        task: Option<String>,
        message: String,
        #[serde(default)]
        fatal: bool,
        /// Best-effort aggregate carried by a fatal error.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial: Option<Value>,
    },
    /// Every task finished and the aggregate was handed off.
    Complete {
        results: Map<String, Value>,
        correlation_id: Option<String>,
        #[serde(default)]
        degraded: Vec<String>,
        #[serde(default)]
        failed: Vec<String>,
    },
}

impl ProgressEvent {
    pub fn partial(task: &str, data: Value, degraded: bool) -> Self {
        ProgressEvent::Partial {
            task: task.to_string(),
            data,
            degraded,
        }
    }

    pub fn task_error(task: &str, message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            task: Some(task.to_string()),
            message: message.into(),
            fatal: false,
            partial: None,
        }
    }

    pub fn fatal(message: impl Into<String>, aggregate: &Aggregate) -> Self {
        ProgressEvent::Error {
            task: None,
            message: message.into(),
            fatal: true,
            partial: Some(Value::Object(aggregate.results.clone())),
        }
    }

    pub fn complete(aggregate: &Aggregate) -> Self {
        ProgressEvent::Complete {
            results: aggregate.results.clone(),
            correlation_id: aggregate.correlation_id.clone(),
            degraded: aggregate.degraded.clone(),
            failed: aggregate.failed.clone(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ProgressEvent::Partial { .. } => EventKind::Partial,
            ProgressEvent::Error { .. } => EventKind::Error,
            ProgressEvent::Complete { .. } => EventKind::Complete,
        }
    }

    /// Task the event reports on; `None` for run-level events.
    pub fn task_name(&self) -> Option<&str> {
        match self {
            ProgressEvent::Partial { task, .. } => Some(task),
            ProgressEvent::Error { task, .. } => task.as_deref(),
            ProgressEvent::Complete { .. } => None,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            ProgressEvent::Partial { data, .. } => data.clone(),
            ProgressEvent::Error {
                message,
                fatal,
                partial,
                ..
            } => json!({"message": message, "fatal": fatal, "partial": partial}),
            ProgressEvent::Complete {
                results,
                correlation_id,
                ..
            } => json!({"results": results, "correlation_id": correlation_id}),
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            ProgressEvent::Complete { .. } => true,
            ProgressEvent::Error { fatal, .. } => *fatal,
            ProgressEvent::Partial { .. } => false,
        }
    }
}

/// Results of every succeeded task, keyed by task name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub correlation_id: Option<String>,
    pub results: Map<String, Value>,
    /// Keys whose result is a fallback value.
    pub degraded: Vec<String>,
    /// Names of tasks that failed and have no entry in `results`.
    pub failed: Vec<String>,
}

impl Aggregate {
    pub fn new(correlation_id: Option<String>) -> Self {
        Self {
            correlation_id,
            ..Self::default()
        }
    }

    /// Store a result. A name seen before is stored as `name#2`, `name#3`
    /// and so on. Returns the key used.
    pub fn insert(&mut self, name: &str, value: Value, degraded: bool) -> String {
        let mut key = name.to_string();
        let mut n = 1;
        while self.results.contains_key(&key) {
            n += 1;
            key = format!("{}#{}", name, n);
        }
        self.results.insert(key.clone(), value);
        if degraded {
            self.degraded.push(key.clone());
        }
        key
    }

    pub fn record_failure(&mut self, name: &str) {
        self.failed.push(name.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.results.get(key)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
