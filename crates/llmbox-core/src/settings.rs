//! Engine settings: declared schema, defaults and coercion of client-supplied values.
//!
//! Clients send an untyped JSON object on `session.create`. Every key the
//! schema declares is coerced to its target type and merged over the
//! defaults; unknown keys are ignored and `null` keeps the default.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Assistant name used when the client does not pick one.
pub const DEFAULT_NAME: &str = "Alice";

/// Target type of a settings key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingKind {
    /// Count-like fields. Accepts integers, integral floats and numeric strings.
    Integer,
    /// Probability and penalty fields. Accepts numbers and numeric strings.
    Float,
    /// Passed through. Numbers are rendered to their decimal form.
    Text,
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => f.write_str("integer"),
            Self::Float => f.write_str("float"),
            Self::Text => f.write_str("string"),
        }
    }
}

/// One declared settings key.
#[derive(Clone, Copy, Debug)]
pub struct SettingSpec {
    pub key: &'static str,
    pub kind: SettingKind,
}

const fn spec(key: &'static str, kind: SettingKind) -> SettingSpec {
    SettingSpec { key, kind }
}

/// Every key a client may set, with its target type.
pub const SETTINGS_SCHEMA: &[SettingSpec] = &[
    spec("model", SettingKind::Text),
    spec("name", SettingKind::Text),
    spec("seed", SettingKind::Integer),
    spec("max_tokens", SettingKind::Integer),
    spec("n_ctx", SettingKind::Integer),
    spec("top_k", SettingKind::Integer),
    spec("top_p", SettingKind::Float),
    spec("temperature", SettingKind::Float),
    spec("n_batch", SettingKind::Integer),
    spec("repeat_penalty", SettingKind::Float),
    spec("repeat_last_n", SettingKind::Integer),
    spec("context_erase", SettingKind::Float),
];

/// A settings value the client sent that could not be coerced.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid setting {key}: expected {expected}")]
pub struct SettingsCoercionError {
    pub key: String,
    pub expected: SettingKind,
}

/// Fully-typed parameters of one engine instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Catalog model name or file name. Empty selects the first ready model.
    pub model: String,
    pub name: String,
    pub seed: i64,
    pub max_tokens: i64,
    pub n_ctx: i64,
    pub top_k: i64,
    pub top_p: f64,
    pub temperature: f64,
    pub n_batch: i64,
    pub repeat_penalty: f64,
    pub repeat_last_n: i64,
    /// Fraction of the context window dropped when it overflows.
    pub context_erase: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            name: DEFAULT_NAME.to_owned(),
            seed: i64::from(rand::random::<i32>()),
            max_tokens: 128,
            n_ctx: 2048,
            top_k: 40,
            top_p: 0.9,
            temperature: 0.1,
            n_batch: 8,
            repeat_penalty: 1.2,
            repeat_last_n: 10,
            context_erase: 0.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Coerced {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl SettingKind {
    fn coerce(self, value: &Value) -> Option<Coerced> {
        match self {
            Self::Integer => coerce_integer(value).map(Coerced::Integer),
            Self::Float => coerce_float(value).map(Coerced::Float),
            Self::Text => match value {
                Value::String(s) => Some(Coerced::Text(s.clone())),
                Value::Number(n) => Some(Coerced::Text(n.to_string())),
                _ => None,
            },
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15).then(|| f as i64)
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

impl EngineSettings {
    /// Merge client-supplied settings over the declared defaults.
    pub fn from_raw(raw: &Map<String, Value>) -> Result<Self, SettingsCoercionError> {
        let mut settings = Self::default();
        for spec in SETTINGS_SCHEMA {
            let Some(value) = raw.get(spec.key) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let coerced = spec.kind.coerce(value).ok_or_else(|| SettingsCoercionError {
                key: spec.key.to_owned(),
                expected: spec.kind,
            })?;
            settings.assign(spec.key, coerced);
        }
        if settings.name.trim().is_empty() {
            DEFAULT_NAME.clone_into(&mut settings.name);
        }
        Ok(settings)
    }

    fn assign(&mut self, key: &str, value: Coerced) {
        match (key, value) {
            ("model", Coerced::Text(v)) => self.model = v,
            ("name", Coerced::Text(v)) => self.name = v,
            ("seed", Coerced::Integer(v)) => self.seed = v,
            ("max_tokens", Coerced::Integer(v)) => self.max_tokens = v,
            ("n_ctx", Coerced::Integer(v)) => self.n_ctx = v,
            ("top_k", Coerced::Integer(v)) => self.top_k = v,
            ("top_p", Coerced::Float(v)) => self.top_p = v,
            ("temperature", Coerced::Float(v)) => self.temperature = v,
            ("n_batch", Coerced::Integer(v)) => self.n_batch = v,
            ("repeat_penalty", Coerced::Float(v)) => self.repeat_penalty = v,
            ("repeat_last_n", Coerced::Integer(v)) => self.repeat_last_n = v,
            ("context_erase", Coerced::Float(v)) => self.context_erase = v,
            (key, value) => tracing::debug!(key, ?value, "setting without a typed slot"),
        }
    }

    /// JSON object form, as reported by `session.status`.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
