//! Shape checks applied to extracted values before a task accepts them.

use crate::extract::coerce::{field, field_array};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type Check = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A named predicate over an extracted value.
#[derive(Clone)]
pub struct Validator {
    description: String,
    check: Check,
}

impl Validator {
    pub fn custom<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            check: Arc::new(check),
        }
    }

    /// Every listed field is present and non-null.
    pub fn requires_fields(fields: &[&str]) -> Self {
        let owned: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        Self::custom(format!("requires {}", owned.join(", ")), move |value| {
            owned.iter().all(|f| field(value, f).is_some())
        })
    }

    /// The array under `key` holds at least `count` items.
    pub fn min_items(key: &str, count: usize) -> Self {
        let key = key.to_string();
        Self::custom(format!("{} has at least {} items", key, count), move |value| {
            field_array(value, &key).len() >= count
        })
    }

    /// The array under `key` holds exactly `count` items.
    pub fn exact_items(key: &str, count: usize) -> Self {
        let key = key.to_string();
        Self::custom(format!("{} has exactly {} items", key, count), move |value| {
            field_array(value, &key).len() == count
        })
    }

    /// Passes when every validator passes.
    pub fn all(validators: Vec<Validator>) -> Self {
        let description = validators
            .iter()
            .map(|v| v.description.as_str())
            .collect::<Vec<_>>()
            .join(" and ");
        Self::custom(description, move |value| {
            validators.iter().all(|v| v.check(value))
        })
    }

    pub fn check(&self, value: &Value) -> bool {
        (self.check)(value)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("description", &self.description)
            .finish()
    }
}
