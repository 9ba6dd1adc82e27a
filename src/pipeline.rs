//! TOML pipeline definitions.
//!
//! A pipeline lists seed tasks and, nested under each, the tasks spawned
//! from its result:
//!
//! ```toml
//! [[task]]
//! name = "ats"
//! prompt = "Score this resume: {input}"
//! require = ["ats_score"]
//! fallback = { ats_score = 70 }
//!
//!   [[task.then]]
//!   name = "improve"
//!   prompt = "Fix {parent.ats_issues} in: {input}"
//! ```
//!
//! Prompts may reference `{input}` (the caller input), `{parent}` (the parent
//! result as JSON) and `{parent.<path>}` (a field of it; strings verbatim,
//! anything else as JSON; missing fields render empty).

use crate::core::task::TaskNode;
use crate::core::validate::Validator;
use crate::error::{Error, Result};
use crate::extract::{Choices, Coercion, ExtractProfile};
use crate::orchestration::backend::{GenerationOptions, GenerationRequest};
use crate::orchestration::cache::ResultCache;
use crate::orchestration::retry::RetryPolicy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, LazyLock};

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(input|parent(?:\.[A-Za-z0-9_\-]+)*)\}").unwrap()
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub correlation_id: Option<String>,
    #[serde(rename = "task", default)]
    pub tasks: Vec<TaskDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCount {
    pub field: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceDef {
    pub value: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeDef {
    pub field: String,
    /// Key of the nested object or array holding `field`.
    pub within: Option<String>,
    pub default: String,
    pub choices: Vec<ChoiceDef>,
}

impl NormalizeDef {
    fn coercion(&self) -> Coercion {
        let choices = self.choices.iter().fold(Choices::new(&self.default), |acc, c| {
            let aliases: Vec<&str> = c.aliases.iter().map(String::as_str).collect();
            acc.choice(&c.value, &aliases)
        });
        Coercion::Choice {
            field: self.field.clone(),
            within: self.within.clone(),
            choices,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub name: String,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub model: Option<String>,
    /// Generate through the backend's streaming call.
    #[serde(default)]
    pub stream: bool,
    pub max_attempts: Option<u32>,
    pub salvage_field: Option<String>,
    /// Field defaults filled in wherever the recovered output lacks them.
    pub defaults: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub require: Vec<String>,
    pub min_items: Option<ItemCount>,
    pub exact_items: Option<ItemCount>,
    pub fallback: Option<Value>,
    /// Share results through the run's cache, keyed by name and prompt.
    #[serde(default)]
    pub cache: bool,
    /// Fields coerced from numeric strings to numbers.
    #[serde(default)]
    pub numeric: Vec<String>,
    #[serde(default)]
    pub normalize: Vec<NormalizeDef>,
    #[serde(default)]
    pub then: Vec<TaskDef>,
}

/// Settings shared by every node a pipeline builds.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub options: GenerationOptions,
    pub retry: RetryPolicy,
    pub cache: ResultCache,
}

impl Pipeline {
    pub fn from_toml(text: &str) -> Result<Self> {
        let pipeline: Self = toml::from_str(text)?;
        pipeline.check()?;
        Ok(pipeline)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    fn check(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(Error::Pipeline("no [[task]] entries".to_string()));
        }
        let mut seen = HashSet::new();
        let mut stack: Vec<&TaskDef> = self.tasks.iter().collect();
        while let Some(task) = stack.pop() {
            if task.name.trim().is_empty() {
                return Err(Error::Pipeline("task with an empty name".to_string()));
            }
            if task.prompt.trim().is_empty() {
                return Err(Error::Pipeline(format!("task '{}' has an empty prompt", task.name)));
            }
            if !seen.insert(task.name.as_str()) {
                crate::rlog_debug!("pipeline reuses task name '{}'", task.name);
            }
            stack.extend(task.then.iter());
        }
        Ok(())
    }

    /// Seed nodes for one run over `input`.
    pub fn build(&self, input: &str, ctx: &BuildContext) -> Vec<TaskNode> {
        let input: Arc<str> = Arc::from(input);
        self.tasks
            .iter()
            .map(|task| task.build(&input, None, ctx))
            .collect()
    }
}

impl TaskDef {
    fn profile(&self) -> ExtractProfile {
        let mut profile = ExtractProfile::new();
        if let Some(field) = &self.salvage_field {
            profile = profile.with_salvage_field(field);
        }
        for (field, value) in self.defaults.iter().flatten() {
            profile = profile.with_default(field, value.clone());
        }
        for field in &self.numeric {
            profile = profile.with_coercion(Coercion::Number {
                field: field.clone(),
            });
        }
        for normalize in &self.normalize {
            profile = profile.with_coercion(normalize.coercion());
        }
        profile
    }

    fn validator(&self) -> Option<Validator> {
        let mut checks = Vec::new();
        if !self.require.is_empty() {
            let fields: Vec<&str> = self.require.iter().map(String::as_str).collect();
            checks.push(Validator::requires_fields(&fields));
        }
        if let Some(min) = &self.min_items {
            checks.push(Validator::min_items(&min.field, min.count));
        }
        if let Some(exact) = &self.exact_items {
            checks.push(Validator::exact_items(&exact.field, exact.count));
        }
        match checks.len() {
            0 => None,
            1 => checks.pop(),
            _ => Some(Validator::all(checks)),
        }
    }

    fn options(&self, base: &GenerationOptions) -> GenerationOptions {
        let mut options = base.clone();
        if let Some(temperature) = self.temperature {
            options.temperature = temperature;
        }
        if let Some(max) = self.max_output_tokens {
            options.max_output_tokens = max;
        }
        if let Some(model) = &self.model {
            options.model = Some(model.clone());
        }
        if self.stream {
            options = options.streaming();
        }
        options
    }

    fn build(&self, input: &Arc<str>, parent: Option<&Value>, ctx: &BuildContext) -> TaskNode {
        let prompt = render(&self.prompt, input, parent);
        let request = GenerationRequest::new(prompt.clone()).with_options(self.options(&ctx.options));

        let mut retry = match self.max_attempts {
            Some(n) => {
                let policy = RetryPolicy::new(n);
                match ctx.retry.attempt_timeout() {
                    Some(limit) => policy.with_attempt_timeout(limit),
                    None => policy,
                }
            }
            None => ctx.retry.clone(),
        };
        if let Some(fallback) = &self.fallback {
            retry = retry.with_fallback(fallback.clone());
        }

        let mut node = TaskNode::new(&self.name, request)
            .with_profile(self.profile())
            .with_retry(retry);
        if let Some(validator) = self.validator() {
            node = node.with_validator(validator);
        }
        if self.cache {
            node = node.with_cache(ctx.cache.clone(), format!("{}:{}", self.name, prompt));
        }
        if !self.then.is_empty() {
            let children = self.then.clone();
            let input = Arc::clone(input);
            let ctx = ctx.clone();
            node = node.with_spawn(move |result| {
                children
                    .iter()
                    .map(|child| child.build(&input, Some(result), &ctx))
                    .collect()
            });
        }
        node
    }
}

/// Substitute `{input}`, `{parent}` and `{parent.<path>}` in `template`.
pub fn render(template: &str, input: &str, parent: Option<&Value>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            if name == "input" {
                return input.to_string();
            }
            let mut value = parent;
            for key in name.split('.').skip(1) {
                value = value.and_then(|v| v.get(key));
            }
            match value {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}
