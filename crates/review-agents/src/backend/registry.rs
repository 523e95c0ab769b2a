//! Process-wide provider registry.
//!
//! Each [`ProviderKind`] is resolved at most once per registry: the first
//! lookup reads credentials, builds a client (or records that none is
//! available) and every later lookup reuses the result. Nothing is mutated
//! after that, so lookups need no locking beyond `OnceLock`.
//!
//! | Provider   | Credential            | Base URL override      | Default base URL                 |
//! |------------|-----------------------|------------------------|----------------------------------|
//! | openai     | `OPENAI_API_KEY`      | `OPENAI_BASE_URL`      | `https://api.openai.com/v1`      |
//! | groq       | `GROQ_API_KEY`        | `GROQ_BASE_URL`        | `https://api.groq.com/openai/v1` |
//! | openrouter | `OPENROUTER_API_KEY`  | `OPENROUTER_BASE_URL`  | `https://openrouter.ai/api/v1`   |

use std::sync::{Arc, LazyLock, OnceLock};

use evaluation::ProviderKind;
use tracing::{info, warn};

use super::http::OpenAiCompatible;
use super::CompletionBackend;

/// Where and how to reach one provider.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub base_url: String,
    pub api_key: String,
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// A resolved provider. `Unavailable` means no credential was configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    OpenAi(EndpointConfig),
    Groq(EndpointConfig),
    OpenRouter(EndpointConfig),
    Unavailable,
}

impl Provider {
    /// Resolve `kind` from a variable lookup. A blank credential counts as
    /// absent.
    pub fn from_lookup(kind: ProviderKind, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let (key_var, url_var) = env_names(kind);
        let Some(api_key) = lookup(key_var).filter(|k| !k.trim().is_empty()) else {
            return Self::Unavailable;
        };
        let base_url = lookup(url_var)
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| default_base_url(kind).to_string());
        let config = EndpointConfig {
            base_url: base_url.trim().to_string(),
            api_key: api_key.trim().to_string(),
        };
        match kind {
            ProviderKind::OpenAi => Self::OpenAi(config),
            ProviderKind::Groq => Self::Groq(config),
            ProviderKind::OpenRouter => Self::OpenRouter(config),
        }
    }

    pub fn from_env(kind: ProviderKind) -> Self {
        Self::from_lookup(kind, |name| std::env::var(name).ok())
    }

    pub fn kind(&self) -> Option<ProviderKind> {
        match self {
            Self::OpenAi(_) => Some(ProviderKind::OpenAi),
            Self::Groq(_) => Some(ProviderKind::Groq),
            Self::OpenRouter(_) => Some(ProviderKind::OpenRouter),
            Self::Unavailable => None,
        }
    }

    pub fn endpoint(&self) -> Option<&EndpointConfig> {
        match self {
            Self::OpenAi(c) | Self::Groq(c) | Self::OpenRouter(c) => Some(c),
            Self::Unavailable => None,
        }
    }

    /// Build a client for this provider, if it has an endpoint.
    pub fn connect(&self) -> Option<Arc<dyn CompletionBackend>> {
        let (kind, endpoint) = (self.kind()?, self.endpoint()?);
        match OpenAiCompatible::new(kind.as_str(), endpoint) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!(provider = %kind, error = %e, "failed to build backend client");
                None
            }
        }
    }
}

pub fn default_base_url(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi => "https://api.openai.com/v1",
        ProviderKind::Groq => "https://api.groq.com/openai/v1",
        ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
    }
}

fn env_names(kind: ProviderKind) -> (&'static str, &'static str) {
    match kind {
        ProviderKind::OpenAi => ("OPENAI_API_KEY", "OPENAI_BASE_URL"),
        ProviderKind::Groq => ("GROQ_API_KEY", "GROQ_BASE_URL"),
        ProviderKind::OpenRouter => ("OPENROUTER_API_KEY", "OPENROUTER_BASE_URL"),
    }
}

type Resolver = Arc<dyn Fn(ProviderKind) -> Option<Arc<dyn CompletionBackend>> + Send + Sync>;

/// Lazily populated, read-only-after-init map from provider to backend.
pub struct BackendRegistry {
    slots: [OnceLock<Option<Arc<dyn CompletionBackend>>>; 3],
    resolver: Resolver,
}

static GLOBAL: LazyLock<BackendRegistry> = LazyLock::new(BackendRegistry::from_env);

impl BackendRegistry {
    /// Registry whose first lookup per provider calls `resolver`.
    pub fn with_resolver<F>(resolver: F) -> Self
    where
        F: Fn(ProviderKind) -> Option<Arc<dyn CompletionBackend>> + Send + Sync + 'static,
    {
        Self {
            slots: [OnceLock::new(), OnceLock::new(), OnceLock::new()],
            resolver: Arc::new(resolver),
        }
    }

    /// Resolve providers from environment credentials.
    pub fn from_env() -> Self {
        Self::with_resolver(|kind| Provider::from_env(kind).connect())
    }

    /// The process-wide registry, backed by environment credentials.
    pub fn global() -> &'static BackendRegistry {
        &GLOBAL
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn CompletionBackend>> {
        self.slots[slot_index(kind)]
            .get_or_init(|| {
                let backend = (self.resolver)(kind);
                match &backend {
                    Some(b) => info!(provider = %kind, backend = b.name(), "backend ready"),
                    None => info!(provider = %kind, "no backend configured"),
                }
                backend
            })
            .clone()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let resolved: Vec<&str> = ProviderKind::ALL
            .iter()
            .filter(|k| self.slots[slot_index(**k)].get().is_some())
            .map(|k| k.as_str())
            .collect();
        f.debug_struct("BackendRegistry")
            .field("resolved", &resolved)
            .finish_non_exhaustive()
    }
}

fn slot_index(kind: ProviderKind) -> usize {
    match kind {
        ProviderKind::OpenAi => 0,
        ProviderKind::Groq => 1,
        ProviderKind::OpenRouter => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn absent_credential_is_unavailable() {
        assert_eq!(
            Provider::from_lookup(ProviderKind::Groq, lookup(&[])),
            Provider::Unavailable
        );
        assert_eq!(
            Provider::from_lookup(ProviderKind::Groq, lookup(&[("GROQ_API_KEY", "  ")])),
            Provider::Unavailable
        );
        assert!(Provider::Unavailable.connect().is_none());
    }

    #[test]
    fn credential_uses_default_or_override_url() {
        let p = Provider::from_lookup(ProviderKind::OpenAi, lookup(&[("OPENAI_API_KEY", "k")]));
        assert_eq!(p.kind(), Some(ProviderKind::OpenAi));
        assert_eq!(p.endpoint().unwrap().base_url, "https://api.openai.com/v1");

        let p = Provider::from_lookup(
            ProviderKind::OpenRouter,
            lookup(&[
                ("OPENROUTER_API_KEY", "k"),
                ("OPENROUTER_BASE_URL", "http://proxy:9000/v1"),
            ]),
        );
        assert_eq!(p.endpoint().unwrap().base_url, "http://proxy:9000/v1");
    }

    #[test]
    fn endpoint_debug_redacts_key() {
        let config = EndpointConfig {
            base_url: "u".into(),
            api_key: "sk-123".into(),
        };
        assert!(!format!("{config:?}").contains("sk-123"));
    }

    #[test]
    fn each_provider_resolves_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = BackendRegistry::with_resolver(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        });

        for _ in 0..3 {
            assert!(registry.get(ProviderKind::OpenAi).is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        registry.get(ProviderKind::Groq);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
