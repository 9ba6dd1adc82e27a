//! Recovery of structured values from raw model output.
//!
//! Model text arrives truncated, fenced, wrapped in prose, or not structured
//! at all. [`Extractor::extract`] runs an ordered chain of strategies and
//! reports the first one whose value has the expected shape. It never fails:
//! when nothing works the profile's default object comes back with
//! `ok = false`.

pub mod coerce;
pub mod repair;

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

pub use coerce::Choices;
pub use repair::{repair_candidates, repair_truncated, salvage_field, strip_fence};

/// Field used by the plain-text fallback when no salvage field is set.
pub const MESSAGE_FIELD: &str = "message";

/// The strategy that produced an extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    DirectParse,
    FenceStripped,
    BraceCountedRepair,
    RegexSalvage,
    PlainTextFallback,
    None,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::DirectParse => "direct-parse",
            Strategy::FenceStripped => "fence-stripped",
            Strategy::BraceCountedRepair => "brace-counted-repair",
            Strategy::RegexSalvage => "regex-salvage",
            Strategy::PlainTextFallback => "plain-text-fallback",
            Strategy::None => "none",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub value: Value,
    pub strategy: Strategy,
    pub ok: bool,
    /// The model text exactly as it was passed in.
    pub raw_text: String,
}

/// Clean-up applied to every recovered value.
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    /// Rewrite a numeric string field as a number.
    Number { field: String },
    /// Normalise an enumerated field. With `within`, the field is rewritten
    /// on the object (or each object of the array) stored under that key.
    Choice {
        field: String,
        within: Option<String>,
        choices: Choices,
    },
}

impl Coercion {
    fn apply(&self, value: &mut Value) {
        match self {
            Coercion::Number { field } => {
                coerce::coerce_number_field(value, field);
            }
            Coercion::Choice {
                field,
                within,
                choices,
            } => match within {
                Some(key) => {
                    if let Some(inner) = value.get_mut(key) {
                        choices.apply(inner, field);
                    }
                }
                None => choices.apply(value, field),
            },
        }
    }
}

/// What a task expects its output to look like.
///
/// With a salvage field the value must be an object. A missing or null
/// salvage field is filled from [`ExtractProfile::default_value`] along with
/// the other defaults, and the parsed fields are kept as they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractProfile {
    salvage_field: Option<String>,
    defaults: Map<String, Value>,
    coercions: Vec<Coercion>,
}

impl ExtractProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_salvage_field(mut self, field: impl Into<String>) -> Self {
        self.salvage_field = Some(field.into());
        self
    }

    pub fn with_default(mut self, field: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(field.into(), value);
        self
    }

    pub fn with_coercion(mut self, coercion: Coercion) -> Self {
        self.coercions.push(coercion);
        self
    }

    pub fn salvage_field(&self) -> Option<&str> {
        self.salvage_field.as_deref()
    }

    /// Default object returned when every strategy fails.
    pub fn default_value(&self) -> Value {
        let mut object = self.defaults.clone();
        if let Some(field) = &self.salvage_field {
            object
                .entry(field.clone())
                .or_insert_with(|| Value::String(String::new()));
        }
        Value::Object(object)
    }

    fn accepts(&self, value: &Value) -> bool {
        match &self.salvage_field {
            Some(_) => value.is_object(),
            None => value.is_object() || value.is_array(),
        }
    }

    /// Whether the salvage field (when set) holds a non-null value.
    fn has_field(&self, value: &Value) -> bool {
        match &self.salvage_field {
            Some(field) => value.get(field).is_some_and(|v| !v.is_null()),
            None => true,
        }
    }

    fn fill_defaults(&self, value: &mut Value) {
        let Some(object) = value.as_object_mut() else {
            return;
        };
        if let Value::Object(defaults) = self.default_value() {
            for (key, default) in defaults {
                match object.get_mut(&key) {
                    Some(slot) if !slot.is_null() => {}
                    Some(slot) => *slot = default,
                    None => {
                        object.insert(key, default);
                    }
                }
            }
        }
    }

    fn with_text_field(&self, field: &str, text: String) -> Value {
        let mut object = self.defaults.clone();
        object.insert(field.to_string(), Value::String(text));
        Value::Object(object)
    }

    /// Whether `text` carries markers of structured output.
    fn looks_structured(&self, text: &str) -> bool {
        if text.starts_with(['{', '[', '"']) {
            return true;
        }
        self.salvage_field
            .iter()
            .chain(self.defaults.keys())
            .any(|field| text.contains(&format!("\"{}\"", field)))
    }
}

/// Runs the strategy chain for one [`ExtractProfile`].
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    profile: ExtractProfile,
}

impl Extractor {
    pub fn new(profile: ExtractProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &ExtractProfile {
        &self.profile
    }

    pub fn extract(&self, raw: &str) -> Extraction {
        let text = raw.trim();
        if text.is_empty() {
            return self.nothing(raw);
        }

        if let Some(value) = self.parse_accepted(text) {
            return self.found(raw, value, Strategy::DirectParse);
        }

        let fenced = strip_fence(text);
        if let Some(inner) = fenced {
            if let Some(value) = self.parse_accepted(inner) {
                return self.found(raw, value, Strategy::FenceStripped);
            }
        }
        let candidate = fenced.unwrap_or(text);

        // A repaired object without the salvage field only wins when the
        // field cannot be salvaged from the text either.
        let mut partial: Option<Value> = None;
        for repaired in repair_candidates(candidate) {
            let Some(value) = self.parse_accepted(&repaired) else {
                continue;
            };
            if self.profile.has_field(&value) {
                return self.found(raw, value, Strategy::BraceCountedRepair);
            }
            let is_empty = value.as_object().is_some_and(Map::is_empty);
            if partial.is_none() && !is_empty {
                partial = Some(value);
            }
        }

        if let Some(field) = self.profile.salvage_field() {
            if let Some(content) = salvage_field(text, field) {
                let mut value = partial.unwrap_or_else(|| self.profile.default_value());
                if let Some(object) = value.as_object_mut() {
                    object.insert(field.to_string(), Value::String(content));
                }
                return self.found(raw, value, Strategy::RegexSalvage);
            }
        }

        if let Some(value) = partial {
            return self.found(raw, value, Strategy::BraceCountedRepair);
        }

        if !candidate.is_empty() && !self.profile.looks_structured(candidate) {
            let field = self.profile.salvage_field().unwrap_or(MESSAGE_FIELD);
            let value = self.profile.with_text_field(field, candidate.to_string());
            return self.found(raw, value, Strategy::PlainTextFallback);
        }

        self.nothing(raw)
    }

    fn found(&self, raw: &str, mut value: Value, strategy: Strategy) -> Extraction {
        self.profile.fill_defaults(&mut value);
        for coercion in &self.profile.coercions {
            coercion.apply(&mut value);
        }
        Extraction {
            value,
            strategy,
            ok: true,
            raw_text: raw.to_string(),
        }
    }

    fn parse_accepted(&self, text: &str) -> Option<Value> {
        let value: Value = serde_json::from_str(text).ok()?;
        self.profile.accepts(&value).then_some(value)
    }

    fn nothing(&self, raw: &str) -> Extraction {
        Extraction {
            value: self.profile.default_value(),
            strategy: Strategy::None,
            ok: false,
            raw_text: raw.to_string(),
        }
    }
}

/// Extract with the default profile (any object or array is accepted).
pub fn extract(raw: &str) -> Extraction {
    Extractor::default().extract(raw)
}
