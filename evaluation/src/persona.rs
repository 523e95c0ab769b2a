//! Persona panel loading.
//!
//! Personas are static configuration: loaded once, validated, then shared
//! read-only by every request.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::types::PersonaConfig;

const BUILTIN_PERSONAS: &str = include_str!("../personas.toml");

#[derive(Debug, Deserialize)]
struct PersonaFile {
    #[serde(default)]
    persona: Vec<PersonaConfig>,
}

/// A validated, non-empty list of personas with unique ids.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaSet {
    personas: Vec<PersonaConfig>,
}

impl PersonaSet {
    /// Validate an in-memory list. Ids are stored trimmed.
    pub fn new(mut personas: Vec<PersonaConfig>) -> ConfigResult<Self> {
        if personas.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut seen = HashSet::new();
        for (position, persona) in personas.iter_mut().enumerate() {
            let id = persona.persona_id.trim();
            if id.is_empty() {
                return Err(ConfigError::MissingId { position });
            }
            if id.len() != persona.persona_id.len() {
                persona.persona_id = id.to_string();
            }
            if !seen.insert(persona.persona_id.clone()) {
                return Err(ConfigError::DuplicateId(persona.persona_id.clone()));
            }
            validate_weighting(persona)?;
        }

        Ok(Self { personas })
    }

    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let file: PersonaFile = toml::from_str(raw)?;
        Self::new(file.persona)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let set = Self::from_toml_str(&raw)?;
        info!(path = %path.display(), count = set.len(), "loaded persona panel");
        Ok(set)
    }

    /// The panel shipped with the service.
    pub fn builtin() -> ConfigResult<Self> {
        Self::from_toml_str(BUILTIN_PERSONAS)
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn as_slice(&self) -> &[PersonaConfig] {
        &self.personas
    }

    pub fn get(&self, persona_id: &str) -> Option<&PersonaConfig> {
        self.personas.iter().find(|p| p.persona_id == persona_id)
    }

    pub fn into_vec(self) -> Vec<PersonaConfig> {
        self.personas
    }
}

fn validate_weighting(persona: &PersonaConfig) -> ConfigResult<()> {
    let w = &persona.weighting;
    let invalid = |reason: &str| ConfigError::InvalidWeighting {
        persona_id: persona.persona_id.clone(),
        reason: reason.to_string(),
    };

    for value in [w.clarity, w.uniqueness, w.persuasiveness] {
        if !value.is_finite() {
            return Err(invalid("weights must be finite"));
        }
        if value < 0.0 {
            return Err(invalid("weights must be non-negative"));
        }
    }
    if w.total() <= 0.0 {
        return Err(invalid("weights must have a positive total"));
    }
    Ok(())
}
