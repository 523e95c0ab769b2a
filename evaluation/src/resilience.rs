//! Resilience: soft failures and degraded resolution.
//!
//! Nothing in the evaluation path raises. Each step either produces a value
//! or a [`SoftFailure`], and each persona run records how it was resolved.
//!
//! ```text
//! persona run
//!   ├─ backend answer, schema-valid, plausible  → Accepted    (Full)
//!   ├─ backend answer looks like a placeholder  → Degenerate  (Partial, heuristic recompute)
//!   ├─ transport / timeout / invalid            → Failed      (Partial, heuristic recompute)
//!   ├─ backend disabled or not configured       → Heuristic   (Full)
//!   └─ heuristic cannot run                     → Sentinel    (Unavailable)
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{PersonaOutput, Score};

/// Score value a forced fallback reports in every category.
pub const FALLBACK_SCORE: u8 = 50;
/// Confidence carried by the sentinel output.
pub const SENTINEL_CONFIDENCE: f64 = 0.3;
/// Backend outputs below this confidence are treated as degenerate.
pub const DEGENERATE_CONFIDENCE: f64 = 0.5;
/// Summary phrases that mark a placeholder answer (matched case-insensitively).
pub const FALLBACK_MARKERS: [&str; 2] = ["fallback evaluation", "unable to evaluate"];

const SENTINEL_SUMMARY: &str = "fallback evaluation: persona unavailable";

/// How much of the intended capability produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    Full,
    Partial,
    Unavailable,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Why a backend answer was judged a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegenerateSignal {
    /// Every category equals [`FALLBACK_SCORE`].
    SentinelScores,
    /// Summary contains one of [`FALLBACK_MARKERS`].
    MarkerPhrase,
    /// Confidence below [`DEGENERATE_CONFIDENCE`].
    LowConfidence,
}

impl std::fmt::Display for DegenerateSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SentinelScores => write!(f, "sentinel_scores"),
            Self::MarkerPhrase => write!(f, "marker_phrase"),
            Self::LowConfidence => write!(f, "low_confidence"),
        }
    }
}

/// A recoverable failure of one attempt. Never surfaces to a caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SoftFailure {
    #[error("no backend configured")]
    NoBackend,

    #[error("backend call failed: {0}")]
    Transport(String),

    #[error("backend call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("backend output did not match {shape}")]
    Invalid { shape: &'static str },

    #[error("backend output looks degenerate ({0})")]
    Degenerate(DegenerateSignal),

    #[error("coordinated review covered {got} of {expected} personas")]
    Incomplete { expected: usize, got: usize },
}

/// Terminal state of one persona run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Backend answer used as-is.
    Accepted,
    /// Backend answered with a placeholder; heuristic result used.
    Degenerate,
    /// Backend failed; heuristic result used.
    Failed,
    /// Backend not used; heuristic result.
    Heuristic,
    /// Last resort placeholder.
    Sentinel,
}

impl Resolution {
    pub fn level(self) -> DegradationLevel {
        match self {
            Self::Accepted | Self::Heuristic => DegradationLevel::Full,
            Self::Degenerate | Self::Failed => DegradationLevel::Partial,
            Self::Sentinel => DegradationLevel::Unavailable,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Degenerate => write!(f, "degenerate"),
            Self::Failed => write!(f, "failed"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::Sentinel => write!(f, "sentinel"),
        }
    }
}

/// Aggregation strategies, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One backend call reviews as every persona at once.
    Coordinated,
    /// One evaluator per persona, fanned out concurrently.
    Independent,
}

impl Strategy {
    /// Ordered strategies to try for a run. `Independent` is always last and
    /// cannot fail.
    pub fn plan(coordinated_enabled: bool) -> Vec<Strategy> {
        if coordinated_enabled {
            vec![Self::Coordinated, Self::Independent]
        } else {
            vec![Self::Independent]
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coordinated => write!(f, "coordinated"),
            Self::Independent => write!(f, "independent"),
        }
    }
}

/// Check a schema-valid output for placeholder signals.
///
/// Content-based guess: a legitimately neutral review with all-50 scores is
/// classified as degenerate too.
pub fn degenerate_signal(output: &PersonaOutput) -> Option<DegenerateSignal> {
    if output.scores == Score::uniform(FALLBACK_SCORE) {
        return Some(DegenerateSignal::SentinelScores);
    }
    let summary = output.summary.to_lowercase();
    if FALLBACK_MARKERS.iter().any(|m| summary.contains(m)) {
        return Some(DegenerateSignal::MarkerPhrase);
    }
    if output.confidence < DEGENERATE_CONFIDENCE {
        return Some(DegenerateSignal::LowConfidence);
    }
    None
}

/// Inert output used only when no other path can run.
pub fn sentinel_output(persona_id: impl Into<String>) -> PersonaOutput {
    PersonaOutput {
        persona_id: persona_id.into(),
        summary: SENTINEL_SUMMARY.to_string(),
        scores: Score::uniform(FALLBACK_SCORE),
        comment: String::new(),
        evidence: Vec::new(),
        confidence: SENTINEL_CONFIDENCE,
        slide_evaluations: None,
    }
}
