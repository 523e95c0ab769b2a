//! Schema validation and repair for untrusted structured output.
//!
//! Every piece of externally produced structured data passes through
//! [`validate_or_repair`] before it becomes a typed record. Each target type
//! implements [`Shape`]: a lenient serde wire form plus a `from_wire`
//! conversion that range-checks and normalizes.
//!
//! ```text
//! candidate ── direct parse + check ──ok──► typed value
//!     │ fail (text only)
//!     ▼
//! each `{` start ── balanced span ── parse + check ──ok──► typed value
//!     │ all fail
//!     ▼
//!   None  (issues + candidate logged at warn)
//! ```

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{
    ArcPoint, ArcShape, CoordinatedReview, Consensus, EmotionalArc, Evidence, PersonaOutput,
    Score, SlideEvaluation, SlideMove, StructureSuggestion, WhatIf,
};

/// Upper bound on `{` positions tried when scanning text for an object.
const MAX_SPAN_ATTEMPTS: usize = 64;
/// Candidate text logged on failure is cut to this many characters.
const LOGGED_CANDIDATE_CHARS: usize = 512;

/// Something believed to contain a value of some shape.
#[derive(Debug, Clone, Copy)]
pub enum Candidate<'a> {
    /// Already-parsed structure.
    Value(&'a Value),
    /// Raw text, possibly wrapped in prose or markdown fences.
    Text(&'a str),
}

impl<'a> From<&'a str> for Candidate<'a> {
    fn from(text: &'a str) -> Self {
        Candidate::Text(text)
    }
}

impl<'a> From<&'a String> for Candidate<'a> {
    fn from(text: &'a String) -> Self {
        Candidate::Text(text.as_str())
    }
}

impl<'a> From<&'a Value> for Candidate<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::String(text) => Candidate::Text(text.as_str()),
            other => Candidate::Value(other),
        }
    }
}

/// A declared shape that untrusted data can be checked against.
pub trait Shape: Sized {
    /// Name used in diagnostics.
    const NAME: &'static str;

    /// Lenient serde form accepted from the outside.
    type Wire: DeserializeOwned;

    /// Range-check and normalize. Returns every issue found.
    fn from_wire(wire: Self::Wire) -> Result<Self, Vec<String>>;
}

/// Validate `candidate` against `S`, repairing text by extracting an
/// embedded object if needed. Returns `None` when no safe value exists.
pub fn validate_or_repair<'a, S: Shape>(candidate: impl Into<Candidate<'a>>) -> Option<S> {
    let candidate = candidate.into();

    let direct = match candidate {
        Candidate::Value(value) => validate_value::<S>(value),
        Candidate::Text(text) => validate_text::<S>(text.trim()),
    };
    let mut issues = match direct {
        Ok(value) => return Some(value),
        Err(issues) => issues,
    };

    if let Candidate::Text(text) = candidate {
        for span in object_spans(text).take(MAX_SPAN_ATTEMPTS) {
            match validate_text::<S>(span) {
                Ok(value) => {
                    debug!(shape = S::NAME, "repaired candidate from embedded object");
                    return Some(value);
                }
                Err(span_issues) => issues.extend(span_issues),
            }
        }
    }

    let shown = match candidate {
        Candidate::Value(value) => value.to_string(),
        Candidate::Text(text) => text.to_string(),
    };
    warn!(
        shape = S::NAME,
        issues = ?issues,
        candidate = %truncate_chars(&shown, LOGGED_CANDIDATE_CHARS),
        "structured output failed validation"
    );
    None
}

/// Strict check of an already-parsed value (no repair).
pub fn validate_value<S: Shape>(value: &Value) -> Result<S, Vec<String>> {
    let wire: S::Wire = serde_json::from_value(value.clone())
        .map_err(|e| vec![format!("{}: {e}", S::NAME)])?;
    S::from_wire(wire)
}

fn validate_text<S: Shape>(text: &str) -> Result<S, Vec<String>> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| vec![format!("{}: not JSON: {e}", S::NAME)])?;
    validate_value::<S>(&value)
}

/// Balanced `{...}` spans, one per `{` in the text, in order of their start.
///
/// Braces inside JSON string literals are ignored. Starts that never
/// balance are skipped.
pub fn object_spans(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(move |(start, _)| balanced_end(&text[start..]).map(|len| &text[start..start + len]))
}

fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (pos, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(pos + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Deterministic JSON Schema text for `T`, embedded in backend instructions.
pub fn schema_description<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    serde_json::to_string(&schema).unwrap_or_default()
}

/// Normalize one score: values in `(0, 1]` are fractions and get scaled by
/// 100, then the value is rounded and must lie in `[0, 100]`.
pub fn normalize_score(field: &str, raw: f64) -> Result<u8, String> {
    if !raw.is_finite() {
        return Err(format!("{field}: not a finite number"));
    }
    let scaled = if raw > 0.0 && raw <= 1.0 {
        raw * 100.0
    } else {
        raw
    };
    let rounded = scaled.round();
    if !(0.0..=100.0).contains(&rounded) {
        return Err(format!("{field}: {raw} is outside 0..=100"));
    }
    Ok(rounded as u8)
}

fn bounded_int(field: &str, raw: f64, max: f64) -> Result<u32, String> {
    if !raw.is_finite() {
        return Err(format!("{field}: not a finite number"));
    }
    let rounded = raw.round();
    if rounded < 0.0 || rounded > max {
        return Err(format!("{field}: {raw} is outside 0..={max}"));
    }
    Ok(rounded as u32)
}

fn slide_number(field: &str, raw: f64) -> Result<u32, String> {
    if !raw.is_finite() || raw < 0.0 || raw.fract() != 0.0 || raw > u32::MAX as f64 {
        return Err(format!("{field}: {raw} is not a slide number"));
    }
    Ok(raw as u32)
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Collects issues so every problem in a candidate is reported at once.
#[derive(Default)]
struct Issues(Vec<String>);

impl Issues {
    fn take<T>(&mut self, result: Result<T, String>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.0.push(e);
                None
            }
        }
    }

    fn push(&mut self, issue: String) {
        self.0.push(issue);
    }

    fn finish<T>(self, value: Option<T>) -> Result<T, Vec<String>> {
        match value {
            Some(v) if self.0.is_empty() => Ok(v),
            _ => Err(self.0),
        }
    }
}

// ── PersonaOutput ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ScoreWire {
    pub clarity: f64,
    pub uniqueness: f64,
    pub persuasiveness: f64,
}

#[derive(Debug, Deserialize)]
pub struct EvidenceWire {
    #[serde(default)]
    pub slide: Option<f64>,
    #[serde(default)]
    pub quote: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SlideEvaluationWire {
    pub slide: f64,
    pub comment: String,
}

#[derive(Debug, Deserialize)]
pub struct PersonaOutputWire {
    #[serde(default)]
    pub persona_id: Option<String>,
    pub summary: String,
    pub scores: ScoreWire,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub evidence: Vec<EvidenceWire>,
    pub confidence: f64,
    #[serde(default)]
    pub slide_evaluations: Option<Vec<SlideEvaluationWire>>,
}

impl Shape for Score {
    const NAME: &'static str = "Score";
    type Wire = ScoreWire;

    fn from_wire(wire: ScoreWire) -> Result<Self, Vec<String>> {
        let mut issues = Issues::default();
        let clarity = issues.take(normalize_score("scores.clarity", wire.clarity));
        let uniqueness = issues.take(normalize_score("scores.uniqueness", wire.uniqueness));
        let persuasiveness =
            issues.take(normalize_score("scores.persuasiveness", wire.persuasiveness));
        let score = match (clarity, uniqueness, persuasiveness) {
            (Some(clarity), Some(uniqueness), Some(persuasiveness)) => Some(Score {
                clarity,
                uniqueness,
                persuasiveness,
            }),
            _ => None,
        };
        issues.finish(score)
    }
}

impl Shape for PersonaOutput {
    const NAME: &'static str = "PersonaOutput";
    type Wire = PersonaOutputWire;

    fn from_wire(wire: PersonaOutputWire) -> Result<Self, Vec<String>> {
        let mut issues = Issues::default();

        let scores = match Score::from_wire(wire.scores) {
            Ok(s) => Some(s),
            Err(score_issues) => {
                score_issues.into_iter().for_each(|i| issues.push(i));
                None
            }
        };

        if !wire.confidence.is_finite() || !(0.0..=1.0).contains(&wire.confidence) {
            issues.push(format!("confidence: {} is outside 0..=1", wire.confidence));
        }

        let mut evidence = Vec::with_capacity(wire.evidence.len());
        for (i, ev) in wire.evidence.into_iter().enumerate() {
            let slide = match ev.slide {
                Some(raw) => issues.take(slide_number(&format!("evidence[{i}].slide"), raw)),
                None => None,
            };
            evidence.push(Evidence {
                slide,
                quote: ev.quote,
            });
        }

        let slide_evaluations = wire.slide_evaluations.map(|evals| {
            evals
                .into_iter()
                .enumerate()
                .filter_map(|(i, e)| {
                    let slide =
                        issues.take(slide_number(&format!("slide_evaluations[{i}].slide"), e.slide))?;
                    Some(SlideEvaluation {
                        slide,
                        comment: e.comment,
                    })
                })
                .collect()
        });

        let output = scores.map(|scores| PersonaOutput {
            persona_id: wire.persona_id.unwrap_or_default(),
            summary: wire.summary,
            scores,
            comment: wire.comment,
            evidence,
            confidence: wire.confidence,
            slide_evaluations,
        });
        issues.finish(output)
    }
}

// ── Consensus ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WhatIfWire {
    pub change: String,
    pub expected_gain: f64,
    pub uncertainty: f64,
}

#[derive(Debug, Deserialize)]
pub struct ConsensusWire {
    #[serde(default)]
    pub agreements: Vec<String>,
    #[serde(default)]
    pub disagreements: Vec<String>,
    pub overall_score: f64,
    #[serde(default)]
    pub top_todos: Vec<String>,
    #[serde(default)]
    pub what_if: Vec<WhatIfWire>,
}

impl Shape for Consensus {
    const NAME: &'static str = "Consensus";
    type Wire = ConsensusWire;

    fn from_wire(wire: ConsensusWire) -> Result<Self, Vec<String>> {
        let mut issues = Issues::default();

        let overall = issues
            .take(bounded_int("overall_score", wire.overall_score, 100.0))
            .map(|v| v as u8);
        if wire.top_todos.len() > 3 {
            issues.push(format!("top_todos: {} entries, at most 3", wire.top_todos.len()));
        }
        if wire.what_if.len() > 2 {
            issues.push(format!("what_if: {} entries, at most 2", wire.what_if.len()));
        }

        let mut what_if = Vec::with_capacity(wire.what_if.len());
        for (i, w) in wire.what_if.into_iter().enumerate() {
            let gain = issues.take(bounded_int(
                &format!("what_if[{i}].expected_gain"),
                w.expected_gain,
                100.0,
            ));
            let uncertainty = issues.take(bounded_int(
                &format!("what_if[{i}].uncertainty"),
                w.uncertainty,
                100.0,
            ));
            if let (Some(expected_gain), Some(uncertainty)) = (gain, uncertainty) {
                what_if.push(WhatIf {
                    change: w.change,
                    expected_gain,
                    uncertainty,
                });
            }
        }

        let consensus = overall.map(|overall_score| Consensus {
            agreements: wire.agreements,
            disagreements: wire.disagreements,
            overall_score,
            top_todos: wire.top_todos,
            what_if,
        });
        issues.finish(consensus)
    }
}

// ── CoordinatedReview ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CoordinatedReviewWire {
    pub personas: Vec<PersonaOutputWire>,
    #[serde(default)]
    pub consensus: Option<ConsensusWire>,
}

impl Shape for CoordinatedReview {
    const NAME: &'static str = "CoordinatedReview";
    type Wire = CoordinatedReviewWire;

    fn from_wire(wire: CoordinatedReviewWire) -> Result<Self, Vec<String>> {
        let mut issues = Vec::new();
        let mut personas = Vec::with_capacity(wire.personas.len());
        for persona in wire.personas {
            match PersonaOutput::from_wire(persona) {
                Ok(p) => personas.push(p),
                Err(e) => issues.extend(e),
            }
        }
        let consensus = match wire.consensus.map(Consensus::from_wire) {
            Some(Ok(c)) => Some(c),
            Some(Err(e)) => {
                issues.extend(e);
                None
            }
            None => None,
        };
        if !issues.is_empty() {
            return Err(issues);
        }
        Ok(CoordinatedReview {
            personas,
            consensus,
        })
    }
}

// ── StructureSuggestion ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StructureSuggestionWire {
    pub proposed_order: Vec<u32>,
    #[serde(default)]
    pub moves: Vec<SlideMove>,
    #[serde(default)]
    pub split_candidates: Vec<u32>,
    #[serde(default)]
    pub rationale: String,
}

impl Shape for StructureSuggestion {
    const NAME: &'static str = "StructureSuggestion";
    type Wire = StructureSuggestionWire;

    fn from_wire(wire: StructureSuggestionWire) -> Result<Self, Vec<String>> {
        let mut issues = Vec::new();
        if wire.proposed_order.is_empty() {
            issues.push("proposed_order: empty".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for slide in &wire.proposed_order {
            if !seen.insert(*slide) {
                issues.push(format!("proposed_order: slide {slide} listed twice"));
            }
        }
        for m in &wire.moves {
            if m.to_position == 0 || m.to_position as usize > wire.proposed_order.len() {
                issues.push(format!(
                    "moves: slide {} targets position {} outside the order",
                    m.slide, m.to_position
                ));
            }
        }
        if !issues.is_empty() {
            return Err(issues);
        }
        Ok(StructureSuggestion {
            proposed_order: wire.proposed_order,
            moves: wire.moves,
            split_candidates: wire.split_candidates,
            rationale: wire.rationale,
        })
    }
}

// ── EmotionalArc ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ArcPointWire {
    pub slide: u32,
    pub intensity: f64,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct EmotionalArcWire {
    pub points: Vec<ArcPointWire>,
    pub shape: ArcShape,
    #[serde(default)]
    pub commentary: String,
}

impl Shape for EmotionalArc {
    const NAME: &'static str = "EmotionalArc";
    type Wire = EmotionalArcWire;

    fn from_wire(wire: EmotionalArcWire) -> Result<Self, Vec<String>> {
        let mut issues = Issues::default();
        let points: Vec<ArcPoint> = wire
            .points
            .into_iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let intensity =
                    issues.take(normalize_score(&format!("points[{i}].intensity"), p.intensity))?;
                Some(ArcPoint {
                    slide: p.slide,
                    intensity,
                    label: p.label,
                })
            })
            .collect();
        issues.finish(Some(EmotionalArc {
            points,
            shape: wire.shape,
            commentary: wire.commentary,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_output() -> PersonaOutput {
        PersonaOutput {
            persona_id: "a".into(),
            summary: "Solid deck with a clear ask".into(),
            scores: Score {
                clarity: 72,
                uniqueness: 64,
                persuasiveness: 80,
            },
            comment: "Tighten the market slide".into(),
            evidence: vec![Evidence::slide(3, "TAM $4B")],
            confidence: 0.8,
            slide_evaluations: None,
        }
    }

    #[test]
    fn fractional_scores_are_scaled() {
        assert_eq!(normalize_score("s", 0.72).unwrap(), 72);
        assert_eq!(normalize_score("s", 1.0).unwrap(), 100);
        assert_eq!(normalize_score("s", 0.005).unwrap(), 1);
        assert_eq!(normalize_score("s", 0.0).unwrap(), 0);
        assert_eq!(normalize_score("s", 99.6).unwrap(), 100);
        assert!(normalize_score("s", 101.0).is_err());
        assert!(normalize_score("s", -3.0).is_err());
        assert!(normalize_score("s", f64::NAN).is_err());
    }

    #[test]
    fn value_candidate_validates_directly() {
        let value = serde_json::to_value(sample_output()).unwrap();
        let parsed: PersonaOutput = validate_or_repair(&value).unwrap();
        assert_eq!(parsed, sample_output());
    }

    #[test]
    fn text_round_trip() {
        let text = serde_json::to_string(&sample_output()).unwrap();
        let parsed: PersonaOutput = validate_or_repair(text.as_str()).unwrap();
        assert_eq!(parsed, sample_output());
    }

    #[test]
    fn extracts_object_from_noise() {
        let text = serde_json::to_string(&sample_output()).unwrap();
        let noisy = format!("noise {{{text}}} more noise");
        let parsed: PersonaOutput = validate_or_repair(noisy.as_str()).unwrap();
        assert_eq!(parsed, sample_output());
    }

    #[test]
    fn extracts_object_from_markdown_fence() {
        let text = serde_json::to_string(&sample_output()).unwrap();
        let fenced = format!("Here you go:\n```json\n{text}\n```\n");
        let parsed: PersonaOutput = validate_or_repair(fenced.as_str()).unwrap();
        assert_eq!(parsed, sample_output());
    }

    #[test]
    fn unparsable_text_yields_none() {
        assert!(validate_or_repair::<PersonaOutput>("I cannot help with that {").is_none());
        assert!(validate_or_repair::<PersonaOutput>("").is_none());
    }

    #[test]
    fn fractional_scores_from_backend_normalize() {
        let value = json!({
            "summary": "ok",
            "scores": {"clarity": 0.7, "uniqueness": 0.55, "persuasiveness": 81},
            "confidence": 0.9
        });
        let parsed: PersonaOutput = validate_or_repair(&value).unwrap();
        assert_eq!(parsed.scores.clarity, 70);
        assert_eq!(parsed.scores.uniqueness, 55);
        assert_eq!(parsed.scores.persuasiveness, 81);
        assert!(parsed.persona_id.is_empty());
    }

    #[test]
    fn out_of_range_confidence_rejected() {
        let value = json!({
            "summary": "ok",
            "scores": {"clarity": 70, "uniqueness": 70, "persuasiveness": 70},
            "confidence": 7.5
        });
        let issues = validate_value::<PersonaOutput>(&value).unwrap_err();
        assert!(issues.iter().any(|i| i.starts_with("confidence")));
    }

    #[test]
    fn string_value_candidate_is_treated_as_text() {
        let text = serde_json::to_string(&sample_output()).unwrap();
        let value = Value::String(format!("result: {text}"));
        assert!(validate_or_repair::<PersonaOutput>(&value).is_some());
    }

    #[test]
    fn braces_inside_strings_do_not_break_spans() {
        let text = r#"pre {"a": "}{", "b": {"c": 1}} post"#;
        let spans: Vec<&str> = object_spans(text).collect();
        assert_eq!(spans[0], r#"{"a": "}{", "b": {"c": 1}}"#);
        assert_eq!(spans[1], r#"{"c": 1}"#);
    }

    #[test]
    fn consensus_limits_enforced() {
        let value = json!({
            "overall_score": 70,
            "top_todos": ["a", "b", "c", "d"],
        });
        assert!(validate_value::<Consensus>(&value).is_err());

        let ok = json!({
            "agreements": ["clarity avg=70"],
            "overall_score": 70.4,
            "what_if": [{"change": "x", "expected_gain": 5, "uncertainty": 2}]
        });
        let parsed = validate_value::<Consensus>(&ok).unwrap();
        assert_eq!(parsed.overall_score, 70);
        assert!(parsed.disagreements.is_empty());
    }

    #[test]
    fn schema_description_is_deterministic() {
        let a = schema_description::<PersonaOutput>();
        let b = schema_description::<PersonaOutput>();
        assert_eq!(a, b);
        assert!(a.contains("persuasiveness"));
    }

    #[test]
    fn structure_suggestion_rejects_duplicates() {
        let value = json!({"proposed_order": [1, 2, 2], "rationale": "x"});
        assert!(validate_value::<StructureSuggestion>(&value).is_err());
    }
}
