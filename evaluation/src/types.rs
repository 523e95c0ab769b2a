//! Data model shared by every stage of a review run.
//!
//! | Type               | Produced by              | Consumed by                      |
//! |--------------------|--------------------------|----------------------------------|
//! | `PersonaConfig`    | persona file / defaults  | evaluators, prompts, heuristics  |
//! | `EvaluationInput`  | slide extraction         | evaluators, heuristics           |
//! | `PersonaOutput`    | persona evaluator        | consensus builder, response/stream |
//! | `Consensus`        | consensus builder / merge| response/stream                  |
//! | `AnalysisResponse` | orchestrator             | HTTP boundary, stream reader     |
//!
//! Everything here is plain typed data. Untrusted backend output never
//! deserializes straight into these types; it goes through
//! [`crate::schema`] first.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Literal tag carried by every [`AnalysisResponse`].
pub const SCHEMA_VERSION: &str = "review.v1";

// ── Personas ────────────────────────────────────────────────────────────────

/// Relative emphasis a persona puts on each score category.
///
/// Weights are arbitrary non-negative numbers; they are normalized to shares
/// at use time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weighting {
    pub clarity: f64,
    pub uniqueness: f64,
    pub persuasiveness: f64,
}

impl Weighting {
    pub const EQUAL: Weighting = Weighting {
        clarity: 1.0,
        uniqueness: 1.0,
        persuasiveness: 1.0,
    };

    pub fn total(&self) -> f64 {
        self.clarity + self.uniqueness + self.persuasiveness
    }

    /// Weights as shares summing to 1. Negative weights count as zero; a
    /// non-positive or non-finite total degrades to equal shares.
    pub fn shares(&self) -> [f64; 3] {
        let weights = [self.clarity, self.uniqueness, self.persuasiveness].map(|w| w.max(0.0));
        let total: f64 = weights.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return [1.0 / 3.0; 3];
        }
        weights.map(|w| w / total)
    }
}

impl Default for Weighting {
    fn default() -> Self {
        Self::EQUAL
    }
}

/// Static configuration of one evaluation point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub persona_id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub weighting: Weighting,
    /// Informational only; surfaced to the backend as things this persona
    /// reacts strongly to.
    #[serde(default)]
    pub dealbreakers: Vec<String>,
}

impl PersonaConfig {
    pub fn new(persona_id: impl Into<String>) -> Self {
        Self {
            persona_id: persona_id.into(),
            role: String::new(),
            tone: String::new(),
            weighting: Weighting::EQUAL,
            dealbreakers: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = tone.into();
        self
    }

    pub fn with_weighting(mut self, clarity: f64, uniqueness: f64, persuasiveness: f64) -> Self {
        self.weighting = Weighting {
            clarity,
            uniqueness,
            persuasiveness,
        };
        self
    }

    /// Role text, or the id when no role was configured.
    pub fn display_role(&self) -> &str {
        if self.role.trim().is_empty() {
            &self.persona_id
        } else {
            &self.role
        }
    }
}

// ── Input ───────────────────────────────────────────────────────────────────

/// One slide as reported by the extraction collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SlideRecord {
    pub index: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub texts: Vec<String>,
    #[serde(default, alias = "word_count")]
    pub word_count: u32,
    #[serde(default, alias = "image_count")]
    pub image_count: u32,
    #[serde(default, alias = "chart_count")]
    pub chart_count: u32,
    #[serde(default, alias = "shape_count")]
    pub shape_count: u32,
}

impl SlideRecord {
    pub fn new(index: u32, title: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            ..Self::default()
        }
    }

    /// Title if present, otherwise the first non-blank text block.
    pub fn headline(&self) -> Option<&str> {
        if !self.title.trim().is_empty() {
            return Some(self.title.trim());
        }
        self.texts
            .iter()
            .map(|t| t.trim())
            .find(|t| !t.is_empty())
    }

    pub fn has_visuals(&self) -> bool {
        self.image_count > 0 || self.chart_count > 0
    }
}

/// Normalized view of the deck under review. Immutable for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationInput {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub slides_text: String,
    #[serde(default)]
    pub slides_struct: Vec<SlideRecord>,
    #[serde(default)]
    pub speech_text: Option<String>,
}

impl EvaluationInput {
    /// Whether there is anything to evaluate at all.
    pub fn has_slide_content(&self) -> bool {
        !self.slides_struct.is_empty() || !self.slides_text.trim().is_empty()
    }

    pub fn speech(&self) -> Option<&str> {
        self.speech_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

// ── Scores ──────────────────────────────────────────────────────────────────

/// The three scored categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Clarity,
    Uniqueness,
    Persuasiveness,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::Clarity,
        Category::Uniqueness,
        Category::Persuasiveness,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Clarity => 0,
            Self::Uniqueness => 1,
            Self::Persuasiveness => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clarity => "clarity",
            Self::Uniqueness => "uniqueness",
            Self::Persuasiveness => "persuasiveness",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category scores, each an integer in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Score {
    #[schemars(range(min = 0, max = 100))]
    pub clarity: u8,
    #[schemars(range(min = 0, max = 100))]
    pub uniqueness: u8,
    #[schemars(range(min = 0, max = 100))]
    pub persuasiveness: u8,
}

impl Score {
    pub const MAX: u8 = 100;

    /// Build from arbitrary values, clamping into range.
    pub fn clamped(clarity: i64, uniqueness: i64, persuasiveness: i64) -> Self {
        let c = |v: i64| v.clamp(0, Self::MAX as i64) as u8;
        Self {
            clarity: c(clarity),
            uniqueness: c(uniqueness),
            persuasiveness: c(persuasiveness),
        }
    }

    pub fn uniform(value: u8) -> Self {
        let v = value.min(Self::MAX);
        Self {
            clarity: v,
            uniqueness: v,
            persuasiveness: v,
        }
    }

    pub fn get(&self, category: Category) -> u8 {
        match category {
            Category::Clarity => self.clarity,
            Category::Uniqueness => self.uniqueness,
            Category::Persuasiveness => self.persuasiveness,
        }
    }

    /// Unrounded mean of the three categories.
    pub fn average(&self) -> f64 {
        (self.clarity as f64 + self.uniqueness as f64 + self.persuasiveness as f64) / 3.0
    }
}

// ── Persona output ──────────────────────────────────────────────────────────

/// Citation pointer back into the input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Evidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

impl Evidence {
    pub fn slide(slide: u32, quote: impl Into<String>) -> Self {
        Self {
            slide: Some(slide),
            quote: Some(quote.into()),
        }
    }

    pub fn quote(quote: impl Into<String>) -> Self {
        Self {
            slide: None,
            quote: Some(quote.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SlideEvaluation {
    pub slide: u32,
    pub comment: String,
}

/// One persona's assessment. Created once per (request, persona) and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PersonaOutput {
    pub persona_id: String,
    pub summary: String,
    pub scores: Score,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    /// Self-reported confidence in `[0, 1]`.
    #[schemars(range(min = 0, max = 1))]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_evaluations: Option<Vec<SlideEvaluation>>,
}

// ── Consensus ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WhatIf {
    pub change: String,
    pub expected_gain: u32,
    pub uncertainty: u32,
}

/// Cross-persona synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Consensus {
    #[serde(default)]
    pub agreements: Vec<String>,
    #[serde(default)]
    pub disagreements: Vec<String>,
    #[schemars(range(min = 0, max = 100))]
    pub overall_score: u8,
    /// At most three entries.
    #[serde(default)]
    #[schemars(length(max = 3))]
    pub top_todos: Vec<String>,
    /// At most two entries.
    #[serde(default)]
    #[schemars(length(max = 2))]
    pub what_if: Vec<WhatIf>,
}

// ── Response ────────────────────────────────────────────────────────────────

/// Unit returned by the blocking path and reconstructable from a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub schema_version: String,
    pub personas: Vec<PersonaOutput>,
    pub consensus: Consensus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slides_struct: Option<Vec<SlideRecord>>,
}

impl AnalysisResponse {
    pub fn new(personas: Vec<PersonaOutput>, consensus: Consensus) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            personas,
            consensus,
            slides_struct: None,
        }
    }

    pub fn with_slides(mut self, slides: Vec<SlideRecord>) -> Self {
        self.slides_struct = Some(slides);
        self
    }
}

// ── Supplementary analyses ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SlideMove {
    pub slide: u32,
    /// 1-based target position in the proposed order.
    pub to_position: u32,
    pub reason: String,
}

/// Proposed reordering of the deck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StructureSuggestion {
    pub proposed_order: Vec<u32>,
    #[serde(default)]
    pub moves: Vec<SlideMove>,
    #[serde(default)]
    pub split_candidates: Vec<u32>,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArcPoint {
    pub slide: u32,
    #[schemars(range(min = 0, max = 100))]
    pub intensity: u8,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArcShape {
    Rising,
    Falling,
    Peaked,
    Flat,
}

/// Per-slide emotional intensity across the deck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EmotionalArc {
    pub points: Vec<ArcPoint>,
    pub shape: ArcShape,
    #[serde(default)]
    pub commentary: String,
}

/// Result of a single coordinated call that reviews as every persona at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CoordinatedReview {
    pub personas: Vec<PersonaOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<Consensus>,
}
