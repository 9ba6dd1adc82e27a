//! Bounded re-generation for a single task.
//!
//! Every attempt is an independent backend call; text from a failed attempt
//! is never reused. When the budget runs out the configured fallback (or an
//! empty object) is returned instead of an error.

use crate::extract::{Extractor, Strategy};
use crate::log::preview;
use crate::orchestration::backend::BackendError;
use crate::{rlog_debug, rlog_warn};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Default attempt budget (the first call plus two retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Why one attempt did not produce a usable value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    #[error("backend error: {0}")]
    Backend(BackendError),

    #[error("malformed output: {preview}")]
    Malformed { preview: String },

    #[error("validation rejected the extracted value")]
    Validation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryStatus {
    /// An attempt produced a value that passed validation.
    Valid,
    /// Every attempt failed; `value` is the fallback.
    Exhausted { last_failure: AttemptFailure },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    pub value: Value,
    pub attempts: u32,
    pub status: RetryStatus,
    /// Extraction strategy of the accepted attempt.
    pub strategy: Option<Strategy>,
}

impl RetryOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self.status, RetryStatus::Valid)
    }

    pub fn last_failure(&self) -> Option<&AttemptFailure> {
        match &self.status {
            RetryStatus::Valid => None,
            RetryStatus::Exhausted { last_failure } => Some(last_failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    attempt_timeout: Option<Duration>,
    fallback: Option<Value>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// A budget of zero is raised to one attempt.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt_timeout: None,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Value returned on exhaustion.
    pub fn fallback(&self) -> Value {
        self.fallback.clone().unwrap_or_else(|| json!({}))
    }

    /// Run `generate` until an attempt extracts a value that `validate`
    /// accepts, or the budget is spent.
    pub async fn execute<G, Fut, V>(
        &self,
        label: &str,
        mut generate: G,
        extractor: &Extractor,
        validate: V,
    ) -> RetryOutcome
    where
        G: FnMut() -> Fut,
        Fut: Future<Output = Result<String, BackendError>>,
        V: Fn(&Value) -> bool,
    {
        let mut last_failure = AttemptFailure::Validation;

        for attempt in 1..=self.max_attempts {
            rlog_debug!(
                "[{}] attempt {}/{} starting",
                label,
                attempt,
                self.max_attempts
            );

            let generated = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, generate()).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout(limit)),
                },
                None => generate().await,
            };

            let failure = match generated {
                Err(err) => AttemptFailure::Backend(err),
                Ok(text) => {
                    let extraction = extractor.extract(&text);
                    if !extraction.ok {
                        AttemptFailure::Malformed {
                            preview: preview(&text, 80),
                        }
                    } else if !validate(&extraction.value) {
                        AttemptFailure::Validation
                    } else {
                        rlog_debug!(
                            "[{}] attempt {} accepted via {}",
                            label,
                            attempt,
                            extraction.strategy
                        );
                        return RetryOutcome {
                            value: extraction.value,
                            attempts: attempt,
                            status: RetryStatus::Valid,
                            strategy: Some(extraction.strategy),
                        };
                    }
                }
            };

            rlog_warn!(
                "[{}] attempt {}/{} failed: {}",
                label,
                attempt,
                self.max_attempts,
                failure
            );
            last_failure = failure;
        }

        rlog_warn!(
            "[{}] retries exhausted after {} attempts, using fallback",
            label,
            self.max_attempts
        );
        RetryOutcome {
            value: self.fallback(),
            attempts: self.max_attempts,
            status: RetryStatus::Exhausted { last_failure },
            strategy: None,
        }
    }
}

/// Generate, extract and validate up to `max_attempts` times; on exhaustion
/// return `fallback` unchanged.
pub async fn run_with_retry<G, Fut, V>(
    generate: G,
    validate: V,
    max_attempts: u32,
    fallback: Value,
) -> Value
where
    G: FnMut() -> Fut,
    Fut: Future<Output = Result<String, BackendError>>,
    V: Fn(&Value) -> bool,
{
    RetryPolicy::new(max_attempts)
        .with_fallback(fallback)
        .execute("retry", generate, &Extractor::default(), validate)
        .await
        .value
}
