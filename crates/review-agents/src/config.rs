//! Process configuration from `REVIEW_*` environment variables.
//!
//! Request fields override these values per request; these override the
//! built-in defaults. A malformed value is logged and ignored.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use evaluation::{PersonaSet, RuntimeOptions};
use tracing::{info, warn};

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    /// Persona TOML file. `None` uses the built-in panel.
    pub personas_path: Option<PathBuf>,
    /// Defaults for every request before request-level overrides.
    pub defaults: RuntimeOptions,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
            personas_path: None,
            defaults: RuntimeOptions::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(bind) = parsed::<SocketAddr>("REVIEW_BIND", var("REVIEW_BIND")) {
            config.bind = bind;
        }
        config.personas_path = var("REVIEW_PERSONAS").map(PathBuf::from);

        let opts = &mut config.defaults;
        if let Some(v) = var("REVIEW_USE_LLM").and_then(|raw| flag("REVIEW_USE_LLM", &raw)) {
            opts.use_llm = v;
        }
        if let Some(v) = parsed("REVIEW_LLM_PROVIDER", var("REVIEW_LLM_PROVIDER")) {
            opts.provider = v;
        }
        if let Some(v) = var("REVIEW_PERSONA_MODEL") {
            opts.persona_model = v;
        }
        if let Some(v) = var("REVIEW_MERGE_MODEL") {
            opts.merge_model = v;
        }
        if let Some(ms) = positive("REVIEW_PERSONA_TIMEOUT_MS", var("REVIEW_PERSONA_TIMEOUT_MS")) {
            opts.persona_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = positive("REVIEW_MERGE_TIMEOUT_MS", var("REVIEW_MERGE_TIMEOUT_MS")) {
            opts.merge_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = parsed("REVIEW_DETAIL", var("REVIEW_DETAIL")) {
            opts.detail = v;
        }
        if let Some(v) = positive("REVIEW_SLIDES_TEXT_LIMIT", var("REVIEW_SLIDES_TEXT_LIMIT")) {
            opts.slides_text_limit = v as usize;
        }
        if let Some(v) = positive("REVIEW_EVIDENCE_MAX", var("REVIEW_EVIDENCE_MAX")) {
            opts.evidence_max = v as usize;
        }

        config
    }

    /// Load the configured persona panel, or the built-in one.
    pub fn load_personas(&self) -> Result<PersonaSet> {
        let set = match &self.personas_path {
            Some(path) => PersonaSet::load(path)
                .with_context(|| format!("loading personas from {}", path.display()))?,
            None => PersonaSet::builtin().context("loading built-in personas")?,
        };
        info!(count = set.len(), "persona panel ready");
        Ok(set)
    }
}

fn parsed<T: FromStr>(name: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring malformed value");
            None
        }
    }
}

fn positive(name: &str, raw: Option<String>) -> Option<u64> {
    let value = parsed::<u64>(name, raw)?;
    if value == 0 {
        warn!(variable = name, "ignoring zero value");
        return None;
    }
    Some(value)
}

fn flag(name: &str, raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(variable = name, value = %raw, "ignoring malformed flag");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evaluation::{Detail, ProviderKind};
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ServiceConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(move |name| map.get(name).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let c = config(&[]);
        assert_eq!(c.bind.to_string(), DEFAULT_BIND);
        assert!(c.personas_path.is_none());
        assert_eq!(c.defaults, RuntimeOptions::default());
    }

    #[test]
    fn reads_every_variable() {
        let c = config(&[
            ("REVIEW_BIND", "0.0.0.0:9000"),
            ("REVIEW_PERSONAS", "/etc/review/personas.toml"),
            ("REVIEW_USE_LLM", "off"),
            ("REVIEW_LLM_PROVIDER", "groq"),
            ("REVIEW_PERSONA_MODEL", "llama-3.1-8b"),
            ("REVIEW_MERGE_MODEL", "llama-3.1-70b"),
            ("REVIEW_PERSONA_TIMEOUT_MS", "2500"),
            ("REVIEW_MERGE_TIMEOUT_MS", "4000"),
            ("REVIEW_DETAIL", "high"),
            ("REVIEW_SLIDES_TEXT_LIMIT", "1200"),
            ("REVIEW_EVIDENCE_MAX", "5"),
        ]);
        assert_eq!(c.bind.port(), 9000);
        assert_eq!(
            c.personas_path.as_deref(),
            Some(std::path::Path::new("/etc/review/personas.toml"))
        );
        let o = &c.defaults;
        assert!(!o.use_llm);
        assert_eq!(o.provider, ProviderKind::Groq);
        assert_eq!(o.persona_model, "llama-3.1-8b");
        assert_eq!(o.merge_model, "llama-3.1-70b");
        assert_eq!(o.persona_timeout, Duration::from_millis(2500));
        assert_eq!(o.merge_timeout, Duration::from_millis(4000));
        assert_eq!(o.detail, Detail::High);
        assert_eq!(o.slides_text_limit, 1200);
        assert_eq!(o.evidence_max, 5);
    }

    #[test]
    fn malformed_values_keep_defaults() {
        let c = config(&[
            ("REVIEW_BIND", "not-an-address"),
            ("REVIEW_USE_LLM", "maybe"),
            ("REVIEW_LLM_PROVIDER", "anthropic"),
            ("REVIEW_PERSONA_TIMEOUT_MS", "0"),
            ("REVIEW_MERGE_TIMEOUT_MS", "-5"),
            ("REVIEW_DETAIL", "extreme"),
            ("REVIEW_EVIDENCE_MAX", "  "),
        ]);
        assert_eq!(c.bind.to_string(), DEFAULT_BIND);
        assert_eq!(c.defaults, RuntimeOptions::default());
    }

    #[test]
    fn builtin_personas_load_without_path() {
        let set = config(&[]).load_personas().unwrap();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn missing_persona_file_reports_path() {
        let err = config(&[("REVIEW_PERSONAS", "/nonexistent/personas.toml")])
            .load_personas()
            .unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/personas.toml"));
    }
}
