//! Lenient field access for extracted values.
//!
//! Model output treats `null`, missing keys and empty strings as
//! interchangeable, sends numbers as strings, and invents spellings for
//! enumerated fields. These helpers read through all of that.

use serde_json::{Number, Value};

/// Field lookup that treats a structural `null` as absent.
pub fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| !v.is_null())
}

pub fn field_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    field(value, key).and_then(Value::as_str)
}

/// Elements of an array field, empty when absent, null or not an array.
pub fn field_array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    field(value, key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn field_f64(value: &Value, key: &str) -> Option<f64> {
    field(value, key).and_then(coerce_number)
}

/// Read a number from a JSON number or a numeric string.
///
/// Accepts surrounding whitespace and a trailing percent sign (`" 85% "`).
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim_end().parse().ok(),
        _ => None,
    }
}

/// Rewrite `key` in place as a JSON number when it holds a numeric string.
///
/// Integral values become integers. Returns whether the field is numeric
/// after the call.
pub fn coerce_number_field(value: &mut Value, key: &str) -> bool {
    let Some(slot) = value.get_mut(key) else {
        return false;
    };
    if slot.is_number() {
        return true;
    }
    match coerce_number(slot).and_then(to_json_number) {
        Some(n) => {
            *slot = Value::Number(n);
            true
        }
        None => false,
    }
}

fn to_json_number(n: f64) -> Option<Number> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Some(Number::from(n as i64))
    } else {
        Number::from_f64(n)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Choice {
    canonical: String,
    /// Cleaned canonical value and aliases; never empty strings.
    keys: Vec<String>,
}

/// Fuzzy normaliser for an enumerated field.
///
/// Input is lower-cased, whitespace and hyphens become `_`, other
/// punctuation is dropped. The first choice whose canonical value or any
/// alias occurs in the cleaned input wins; otherwise the default is used.
///
/// ```
/// use ripple::extract::Choices;
///
/// let change = Choices::new("other")
///     .choice("new_hire", &["hire", "appointment", "joined"])
///     .choice("departure", &["left", "resigned", "retired"]);
/// assert_eq!(change.normalize("New Hire!"), "new_hire");
/// assert_eq!(change.normalize("Retired in May"), "departure");
/// assert_eq!(change.normalize("???"), "other");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Choices {
    choices: Vec<Choice>,
    default: String,
}

impl Choices {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            choices: Vec::new(),
            default: default.into(),
        }
    }

    /// Add a choice. Aliases that clean to nothing (`"-"`, `"?"`) are dropped.
    pub fn choice(mut self, canonical: &str, aliases: &[&str]) -> Self {
        let keys = std::iter::once(canonical)
            .chain(aliases.iter().copied())
            .map(clean)
            .filter(|key| !key.is_empty())
            .collect();
        self.choices.push(Choice {
            canonical: canonical.to_string(),
            keys,
        });
        self
    }

    pub fn default_choice(&self) -> &str {
        &self.default
    }

    pub fn normalize(&self, raw: &str) -> &str {
        let cleaned = clean(raw);
        if cleaned.is_empty() {
            return &self.default;
        }
        self.choices
            .iter()
            .find(|choice| choice.keys.iter().any(|key| cleaned.contains(key.as_str())))
            .map(|choice| choice.canonical.as_str())
            .unwrap_or(&self.default)
    }

    /// Normalise a JSON value; non-strings and null map to the default.
    pub fn normalize_value(&self, raw: &Value) -> &str {
        match raw.as_str() {
            Some(s) => self.normalize(s),
            None => &self.default,
        }
    }

    /// Rewrite `key` of an object (or of every object in an array) in place.
    /// A missing key is filled with the default.
    pub fn apply(&self, value: &mut Value, key: &str) {
        match value {
            Value::Object(map) => {
                let normalized = map
                    .get(key)
                    .map(|v| self.normalize_value(v))
                    .unwrap_or(&self.default)
                    .to_string();
                map.insert(key.to_string(), Value::String(normalized));
            }
            Value::Array(items) => {
                for item in items.iter_mut().filter(|item| item.is_object()) {
                    self.apply(item, key);
                }
            }
            _ => {}
        }
    }
}

fn clean(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if (c.is_whitespace() || c == '-' || c == '_') && !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}
