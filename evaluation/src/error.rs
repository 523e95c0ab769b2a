//! Errors that leave the evaluation core.
//!
//! Only input problems propagate to a caller. Backend, validation and merge
//! failures are recovered internally and never show up here.

use std::path::PathBuf;

use thiserror::Error;

/// The caller did not provide something we can evaluate (maps to a 4xx).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("missing slide content: provide slides_struct or slides_text")]
    EmptySlides,

    #[error("field `{field}` has the wrong type: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("no personas configured")]
    NoPersonas,
}

/// Persona / process configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid persona file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("persona file defines no personas")]
    Empty,

    #[error("persona #{position} has an empty persona_id")]
    MissingId { position: usize },

    #[error("duplicate persona_id `{0}`")]
    DuplicateId(String),

    #[error("persona `{persona_id}` has invalid weighting: {reason}")]
    InvalidWeighting { persona_id: String, reason: String },
}

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
