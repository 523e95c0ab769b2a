//! Per-request runtime options.
//!
//! Precedence (highest to lowest):
//!
//! 1. Request-level values, when present and well-typed
//! 2. Process configuration (environment)
//! 3. Built-in defaults below

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Default per-persona backend budget.
pub const DEFAULT_PERSONA_TIMEOUT_MS: u64 = 10_000;
/// Default budget for the consensus merge / coordinated call.
pub const DEFAULT_MERGE_TIMEOUT_MS: u64 = 8_000;
/// Default number of characters of `slides_text` handed to scorers.
pub const DEFAULT_SLIDES_TEXT_LIMIT: usize = 8_000;
/// Default evidence entries per persona.
pub const DEFAULT_EVIDENCE_MAX: usize = 3;
/// Default start-up jitter bounds for backend-bound evaluators.
pub const DEFAULT_JITTER_MS: (u64, u64) = (100, 500);
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// How verbose the evaluation is expected to be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detail {
    Low,
    #[default]
    Normal,
    High,
}

impl std::str::FromStr for Detail {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(format!("unknown detail level: {other}")),
        }
    }
}

impl std::fmt::Display for Detail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Closed set of named completion providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    Groq,
    #[serde(rename = "openrouter")]
    OpenRouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::OpenAi, Self::Groq, Self::OpenRouter];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::OpenRouter => "openrouter",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "groq" => Ok(Self::Groq),
            "openrouter" => Ok(Self::OpenRouter),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved options for one evaluation run.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeOptions {
    pub use_llm: bool,
    /// Try the single coordinated call before independent persona calls.
    pub use_coordinated: bool,
    pub provider: ProviderKind,
    pub persona_model: String,
    pub merge_model: String,
    pub persona_timeout: Duration,
    pub merge_timeout: Duration,
    pub detail: Detail,
    pub slides_text_limit: usize,
    pub evidence_max: usize,
    /// Inclusive jitter bounds in milliseconds. `(0, 0)` disables jitter.
    pub jitter_ms: (u64, u64),
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            use_llm: true,
            use_coordinated: false,
            provider: ProviderKind::default(),
            persona_model: DEFAULT_MODEL.to_string(),
            merge_model: DEFAULT_MODEL.to_string(),
            persona_timeout: Duration::from_millis(DEFAULT_PERSONA_TIMEOUT_MS),
            merge_timeout: Duration::from_millis(DEFAULT_MERGE_TIMEOUT_MS),
            detail: Detail::default(),
            slides_text_limit: DEFAULT_SLIDES_TEXT_LIMIT,
            evidence_max: DEFAULT_EVIDENCE_MAX,
            jitter_ms: DEFAULT_JITTER_MS,
        }
    }
}

impl RuntimeOptions {
    /// Options that never touch a backend and never sleep.
    pub fn heuristic_only() -> Self {
        Self {
            use_llm: false,
            jitter_ms: (0, 0),
            ..Self::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_ms = (0, 0);
        self
    }

    /// Layer request-level overrides on top of `self`.
    ///
    /// Keys that are absent, null, or of the wrong type leave the current
    /// value in place.
    pub fn with_overrides(mut self, request: &Map<String, Value>) -> Self {
        if let Some(v) = typed_bool(request, "use_llm") {
            self.use_llm = v;
        }
        if let Some(v) = typed_bool(request, "use_mastra") {
            self.use_coordinated = v;
        }
        if let Some(v) = typed_parse::<ProviderKind>(request, "llm_provider") {
            self.provider = v;
        }
        if let Some(v) = typed_string(request, "persona_model") {
            self.persona_model = v;
        }
        if let Some(v) = typed_string(request, "merge_model") {
            self.merge_model = v;
        }
        if let Some(v) = typed_positive(request, "persona_timeout_ms") {
            self.persona_timeout = Duration::from_millis(v);
        }
        if let Some(v) = typed_positive(request, "merge_timeout_ms") {
            self.merge_timeout = Duration::from_millis(v);
        }
        if let Some(v) = typed_parse::<Detail>(request, "detail") {
            self.detail = v;
        }
        if let Some(v) = typed_positive(request, "slides_text_limit") {
            self.slides_text_limit = v as usize;
        }
        if let Some(v) = typed_positive(request, "evidence_max") {
            self.evidence_max = v as usize;
        }
        self
    }
}

fn typed_bool(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key)? {
        Value::Bool(b) => Some(*b),
        other => ignored(key, other),
    }
}

fn typed_string(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        other => ignored(key, other),
    }
}

fn typed_positive(map: &Map<String, Value>, key: &str) -> Option<u64> {
    match map.get(key)? {
        Value::Number(n) => match n.as_u64().filter(|v| *v > 0) {
            Some(v) => Some(v),
            None => ignored(key, &Value::Number(n.clone())),
        },
        other => ignored(key, other),
    }
}

fn typed_parse<T: std::str::FromStr>(map: &Map<String, Value>, key: &str) -> Option<T> {
    match map.get(key)? {
        Value::String(s) => match s.parse() {
            Ok(v) => Some(v),
            Err(_) => ignored(key, &Value::String(s.clone())),
        },
        other => ignored(key, other),
    }
}

fn ignored<T>(key: &str, value: &Value) -> Option<T> {
    if !value.is_null() {
        debug!(key, value = %value, "ignoring ill-typed request option");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overrides(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn defaults_match_documented_budgets() {
        let opts = RuntimeOptions::default();
        assert!(opts.use_llm);
        assert_eq!(opts.persona_timeout, Duration::from_secs(10));
        assert_eq!(opts.detail, Detail::Normal);
        assert_eq!(opts.evidence_max, 3);
    }

    #[test]
    fn well_typed_overrides_win() {
        let opts = RuntimeOptions::default().with_overrides(&overrides(json!({
            "use_llm": false,
            "use_mastra": true,
            "llm_provider": "groq",
            "persona_timeout_ms": 2500,
            "detail": "high",
            "evidence_max": 5
        })));
        assert!(!opts.use_llm);
        assert!(opts.use_coordinated);
        assert_eq!(opts.provider, ProviderKind::Groq);
        assert_eq!(opts.persona_timeout, Duration::from_millis(2500));
        assert_eq!(opts.detail, Detail::High);
        assert_eq!(opts.evidence_max, 5);
    }

    #[test]
    fn ill_typed_overrides_are_ignored() {
        let base = RuntimeOptions::default();
        let opts = base.clone().with_overrides(&overrides(json!({
            "use_llm": "yes",
            "llm_provider": "carrier-pigeon",
            "persona_timeout_ms": -5,
            "merge_timeout_ms": 0,
            "detail": 3,
            "persona_model": "   ",
            "evidence_max": null
        })));
        assert_eq!(opts, base);
    }

    #[test]
    fn provider_names_round_trip() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
    }
}
