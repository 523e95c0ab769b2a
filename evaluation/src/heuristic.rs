//! Deterministic, backend-free scoring.
//!
//! Used when no backend is configured and as the fallback whenever a
//! backend answer is unusable. Same `(input, persona, options)` always
//! gives the same output: there is no randomness here.
//!
//! ```text
//! source text ─► TextStats ─► baseline[3] ─► weighting bias ─► clamp ─► Score
//!                   │
//! slides_struct ────┴─► evidence (densest slide │ "Slide N:" match │ summary)
//! ```

use std::sync::LazyLock;

use regex::Regex;

use crate::options::{Detail, RuntimeOptions};
use crate::types::{
    ArcPoint, ArcShape, Category, EmotionalArc, EvaluationInput, Evidence, PersonaConfig,
    PersonaOutput, Score, SlideEvaluation, SlideMove, SlideRecord, StructureSuggestion,
};

/// Confidence reported when there was text to analyze.
pub const HEURISTIC_CONFIDENCE: f64 = 0.68;
/// Confidence reported when the source text was blank.
pub const EMPTY_INPUT_CONFIDENCE: f64 = 0.4;
/// Heuristic scores never leave `[SCORE_FLOOR, SCORE_CEIL]`.
pub const SCORE_FLOOR: i64 = 30;
pub const SCORE_CEIL: i64 = 95;

const BLANK_BASELINE: f64 = 45.0;
/// Points a category moves when its weight share goes from 1/3 to 1.
const WEIGHT_BIAS_SPAN: f64 = 30.0;
const QUOTE_CHARS: usize = 80;
const DENSE_SLIDE_WORDS: u32 = 60;
const LONG_SENTENCE_WORDS: f64 = 18.0;
const MAX_SLIDE_EVALUATIONS: usize = 5;

static SLIDE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*slide\s*(\d+)\s*[:：\-]\s*(.+?)\s*$")
        .expect("SLIDE_LINE_RE regex should compile")
});

// ── Text statistics ─────────────────────────────────────────────────────────

/// Counts derived from the input that drive every heuristic score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextStats {
    pub chars: usize,
    pub words: usize,
    pub sentences: usize,
    /// Distinct lowercase alphanumeric tokens over all tokens, in `[0, 1]`.
    pub unique_ratio: f64,
    pub numeric_tokens: usize,
    pub slides: usize,
    pub images: u32,
    pub charts: u32,
    pub dense_slides: usize,
    pub all_titled: bool,
    pub has_speech: bool,
}

impl TextStats {
    pub fn from_input(input: &EvaluationInput, text_limit: usize) -> Self {
        let text = source_text(input, text_limit);

        let tokens: Vec<&str> = text.split_whitespace().collect();
        let normalized: Vec<String> = tokens
            .iter()
            .map(|t| {
                t.chars()
                    .filter(|c| c.is_alphanumeric())
                    .flat_map(char::to_lowercase)
                    .collect::<String>()
            })
            .filter(|t| !t.is_empty())
            .collect();
        let distinct: std::collections::HashSet<&str> =
            normalized.iter().map(String::as_str).collect();
        let unique_ratio = if normalized.is_empty() {
            0.0
        } else {
            distinct.len() as f64 / normalized.len() as f64
        };

        let sentences = text
            .split(['.', '!', '?', '\n'])
            .filter(|s| !s.trim().is_empty())
            .count();

        let slides = &input.slides_struct;
        Self {
            chars: text.chars().count(),
            words: tokens.len(),
            sentences,
            unique_ratio,
            numeric_tokens: tokens
                .iter()
                .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
                .count(),
            slides: slides.len(),
            images: slides.iter().map(|s| s.image_count).sum(),
            charts: slides.iter().map(|s| s.chart_count).sum(),
            dense_slides: slides
                .iter()
                .filter(|s| s.word_count > DENSE_SLIDE_WORDS)
                .count(),
            all_titled: !slides.is_empty() && slides.iter().all(|s| !s.title.trim().is_empty()),
            has_speech: input.speech().is_some(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.words == 0
    }

    pub fn avg_sentence_words(&self) -> f64 {
        self.words as f64 / self.sentences.max(1) as f64
    }
}

/// `slides_text` cut to `limit` characters, or the summary when that is blank.
pub fn source_text(input: &EvaluationInput, limit: usize) -> &str {
    let slides = truncate_chars(input.slides_text.trim(), limit);
    if slides.is_empty() {
        input.summary.trim()
    } else {
        slides
    }
}

/// Unweighted category scores in `[clarity, uniqueness, persuasiveness]` order.
pub fn baseline(stats: &TextStats) -> [f64; 3] {
    if stats.is_blank() {
        return [BLANK_BASELINE; 3];
    }

    let long_sentence_penalty = (stats.avg_sentence_words() - LONG_SENTENCE_WORDS).max(0.0) * 1.5;
    let dense_penalty = (stats.dense_slides as f64 * 3.0).min(15.0);
    let title_bonus = if stats.all_titled { 4.0 } else { 0.0 };
    let clarity = 78.0 - long_sentence_penalty - dense_penalty + title_bonus;

    let uniqueness =
        55.0 + 40.0 * (stats.unique_ratio - 0.5) + (stats.images as f64 * 2.0).min(8.0);

    let speech_bonus = if stats.has_speech { 4.0 } else { 0.0 };
    let persuasiveness = 58.0
        + (stats.numeric_tokens as f64 * 1.5).min(15.0)
        + (stats.charts as f64 * 4.0).min(10.0)
        + speech_bonus;

    [clarity, uniqueness, persuasiveness]
}

/// Bias a baseline by the persona's weighting and clamp into heuristic range.
pub fn apply_weighting(baseline: [f64; 3], persona: &PersonaConfig) -> Score {
    let shares = persona.weighting.shares();
    let biased: Vec<i64> = baseline
        .iter()
        .zip(shares.iter())
        .map(|(base, share)| {
            let v = base + WEIGHT_BIAS_SPAN * (share - 1.0 / 3.0);
            (v.round() as i64).clamp(SCORE_FLOOR, SCORE_CEIL)
        })
        .collect();
    Score::clamped(biased[0], biased[1], biased[2])
}

// ── Persona scoring ─────────────────────────────────────────────────────────

/// Score one persona without a backend.
pub fn score_persona(
    input: &EvaluationInput,
    persona: &PersonaConfig,
    opts: &RuntimeOptions,
) -> PersonaOutput {
    let stats = TextStats::from_input(input, opts.slides_text_limit);
    let scores = apply_weighting(baseline(&stats), persona);

    let (best, worst) = extremes(&scores);
    let role = persona.display_role();
    let summary = if stats.is_blank() {
        format!("{role} view: no readable slide text, scores reflect structure only")
    } else {
        format!(
            "{role} view: {} slide(s), {} words reviewed; strongest {best} ({}), weakest {worst} ({})",
            stats.slides.max(count_slide_lines(&input.slides_text)),
            stats.words,
            scores.get(best),
            scores.get(worst),
        )
    };

    let mut comment = improvement_hint(worst).to_string();
    if !persona.dealbreakers.is_empty() {
        comment.push_str(" Watch for: ");
        comment.push_str(&persona.dealbreakers.join("; "));
        comment.push('.');
    }

    let slide_evaluations = match opts.detail {
        Detail::High => Some(slide_evaluations(&input.slides_struct)),
        Detail::Normal | Detail::Low => None,
    };

    PersonaOutput {
        persona_id: persona.persona_id.clone(),
        summary,
        scores,
        comment,
        evidence: select_evidence(input, opts.evidence_max),
        confidence: if stats.is_blank() {
            EMPTY_INPUT_CONFIDENCE
        } else {
            HEURISTIC_CONFIDENCE
        },
        slide_evaluations,
    }
}

/// Pick citation evidence.
///
/// Preference order: the slide with the highest word + chart count (lowest
/// index wins ties), the first `Slide N: ...` line in the text, then the
/// summary itself.
pub fn select_evidence(input: &EvaluationInput, max: usize) -> Vec<Evidence> {
    if max == 0 {
        return Vec::new();
    }

    let densest = input
        .slides_struct
        .iter()
        .filter_map(|s| s.headline().map(|h| (s, h)))
        .fold(None::<(&SlideRecord, &str)>, |best, (slide, headline)| {
            let weight = |s: &SlideRecord| s.word_count + s.chart_count;
            match best {
                Some((b, _))
                    if weight(b) > weight(slide)
                        || (weight(b) == weight(slide) && b.index <= slide.index) =>
                {
                    best
                }
                _ => Some((slide, headline)),
            }
        });
    if let Some((slide, headline)) = densest {
        return vec![Evidence::slide(slide.index, quote(headline))];
    }

    if let Some(caps) = SLIDE_LINE_RE.captures(&input.slides_text) {
        if let Ok(number) = caps[1].parse::<u32>() {
            return vec![Evidence::slide(number, quote(&caps[2]))];
        }
    }

    let summary = input.summary.trim();
    let cited = if summary.is_empty() {
        "(no summary provided)"
    } else {
        summary
    };
    vec![Evidence::quote(quote(cited))]
}

fn slide_evaluations(slides: &[SlideRecord]) -> Vec<SlideEvaluation> {
    slides
        .iter()
        .take(MAX_SLIDE_EVALUATIONS)
        .map(|s| {
            let comment = if s.word_count > DENSE_SLIDE_WORDS {
                format!("dense: {} words, consider splitting", s.word_count)
            } else if s.word_count == 0 && s.headline().is_none() {
                "no text content".to_string()
            } else if s.chart_count > 0 {
                format!("{} chart(s) support the message", s.chart_count)
            } else {
                format!("{} words, readable", s.word_count)
            };
            SlideEvaluation {
                slide: s.index,
                comment,
            }
        })
        .collect()
}

fn extremes(scores: &Score) -> (Category, Category) {
    let mut best = Category::Clarity;
    let mut worst = Category::Clarity;
    for category in Category::ALL {
        if scores.get(category) > scores.get(best) {
            best = category;
        }
        if scores.get(category) < scores.get(worst) {
            worst = category;
        }
    }
    (best, worst)
}

fn improvement_hint(category: Category) -> &'static str {
    match category {
        Category::Clarity => "Shorten sentences and give every slide a one-line headline.",
        Category::Uniqueness => "Make explicit what sets this apart from the obvious alternatives.",
        Category::Persuasiveness => {
            "Back the central claims with numbers, a chart, or a concrete example."
        }
    }
}

fn count_slide_lines(text: &str) -> usize {
    SLIDE_LINE_RE.captures_iter(text).count()
}

fn quote(text: &str) -> String {
    let trimmed = text.trim();
    let cut = truncate_chars(trimmed, QUOTE_CHARS);
    if cut.len() < trimmed.len() {
        format!("{cut}…")
    } else {
        cut.to_string()
    }
}

/// Prefix of `text` holding at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

// ── Structure reshuffle ─────────────────────────────────────────────────────

/// Reorder suggestion without a backend: opening and closing slides stay,
/// slides with visuals move ahead of text-only slides in between, dense
/// slides are flagged for splitting.
pub fn suggest_structure(input: &EvaluationInput) -> StructureSuggestion {
    let mut slides: Vec<&SlideRecord> = input.slides_struct.iter().collect();
    slides.sort_by_key(|s| s.index);

    let original: Vec<u32> = slides.iter().map(|s| s.index).collect();
    let proposed: Vec<u32> = if slides.len() <= 3 {
        original.clone()
    } else {
        let (first, rest) = slides.split_at(1);
        let (middle, last) = rest.split_at(rest.len() - 1);
        let visual = middle.iter().filter(|s| s.has_visuals());
        let text_only = middle.iter().filter(|s| !s.has_visuals());
        first
            .iter()
            .chain(visual)
            .chain(text_only)
            .chain(last.iter())
            .map(|s| s.index)
            .collect()
    };

    let moves: Vec<SlideMove> = proposed
        .iter()
        .enumerate()
        .filter(|(pos, slide)| original.get(*pos) != Some(*slide))
        .filter_map(|(pos, slide)| {
            let record = slides.iter().find(|s| s.index == *slide)?;
            let reason = if record.has_visuals() {
                "visual evidence earlier holds attention"
            } else {
                "text-only slide follows its supporting visuals"
            };
            Some(SlideMove {
                slide: *slide,
                to_position: pos as u32 + 1,
                reason: reason.to_string(),
            })
        })
        .collect();

    let split_candidates: Vec<u32> = slides
        .iter()
        .filter(|s| s.word_count > DENSE_SLIDE_WORDS)
        .map(|s| s.index)
        .collect();

    let rationale = match (moves.is_empty(), split_candidates.is_empty()) {
        (true, true) => "current order already leads with its strongest material".to_string(),
        (false, _) => format!(
            "{} slide(s) reordered so visual evidence lands before dense text",
            moves.len()
        ),
        (true, false) => format!(
            "order kept; {} dense slide(s) would read better split",
            split_candidates.len()
        ),
    };

    StructureSuggestion {
        proposed_order: proposed,
        moves,
        split_candidates,
        rationale,
    }
}

// ── Emotional arc ───────────────────────────────────────────────────────────

/// Per-slide intensity without a backend.
pub fn emotional_arc(input: &EvaluationInput) -> EmotionalArc {
    let mut slides: Vec<&SlideRecord> = input.slides_struct.iter().collect();
    slides.sort_by_key(|s| s.index);

    let points: Vec<ArcPoint> = slides
        .iter()
        .map(|s| {
            let text = std::iter::once(s.title.as_str())
                .chain(s.texts.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ");
            let exclamations = text.matches('!').count() as i64;
            let questions = text.matches('?').count() as i64;
            let numeric = text
                .split_whitespace()
                .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
                .count() as i64;
            let visual = if s.chart_count > 0 { 8 } else { 0 };
            let intensity =
                (35 + 12 * exclamations + (5 * numeric).min(25) + visual + 6 * questions)
                    .clamp(0, 100) as u8;
            let label = match intensity {
                70..=u8::MAX => "high",
                45..=69 => "engaged",
                _ => "calm",
            };
            ArcPoint {
                slide: s.index,
                intensity,
                label: label.to_string(),
            }
        })
        .collect();

    let shape = arc_shape(&points);
    let commentary = match shape {
        ArcShape::Rising => "energy builds toward the close",
        ArcShape::Falling => "strong opening that loses energy toward the end",
        ArcShape::Peaked => "energy peaks mid-deck; consider a stronger close",
        ArcShape::Flat => "even delivery throughout; add one clear high point",
    };

    EmotionalArc {
        points,
        shape,
        commentary: commentary.to_string(),
    }
}

fn arc_shape(points: &[ArcPoint]) -> ArcShape {
    let values: Vec<i32> = points.iter().map(|p| p.intensity as i32).collect();
    let (Some(&first), Some(&last)) = (values.first(), values.last()) else {
        return ArcShape::Flat;
    };
    let max = values.iter().copied().max().unwrap_or(first);
    let min = values.iter().copied().min().unwrap_or(first);
    if values.len() < 2 || max - min < 10 {
        return ArcShape::Flat;
    }

    let peak_pos = values.iter().position(|v| *v == max).unwrap_or(0);
    let interior_peak = peak_pos > 0 && peak_pos + 1 < values.len();
    if interior_peak && max - first >= 10 && max - last >= 10 {
        ArcShape::Peaked
    } else if last > first {
        ArcShape::Rising
    } else {
        ArcShape::Falling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_world() -> EvaluationInput {
        EvaluationInput {
            summary: String::new(),
            slides_text: "Slide 1: Hello\nSlide 2: World".into(),
            slides_struct: vec![SlideRecord {
                index: 1,
                title: "Hello".into(),
                texts: vec!["Hello".into()],
                word_count: 1,
                ..SlideRecord::default()
            }],
            speech_text: None,
        }
    }

    fn slide(index: u32, words: u32, charts: u32, images: u32) -> SlideRecord {
        SlideRecord {
            index,
            title: format!("Slide {index}"),
            texts: vec![format!("body {index}")],
            word_count: words,
            chart_count: charts,
            image_count: images,
            ..SlideRecord::default()
        }
    }

    #[test]
    fn hello_world_scenario() {
        let persona = PersonaConfig::new("a");
        let out = score_persona(&hello_world(), &persona, &RuntimeOptions::heuristic_only());
        assert_eq!(out.persona_id, "a");
        assert!((out.confidence - 0.68).abs() < 1e-9);
        assert_eq!(out.evidence[0].slide, Some(1));
        for category in Category::ALL {
            let v = out.scores.get(category) as i64;
            assert!((SCORE_FLOOR..=SCORE_CEIL).contains(&v), "{category}={v}");
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let persona = PersonaConfig::new("a").with_weighting(3.0, 1.0, 2.0);
        let opts = RuntimeOptions::heuristic_only();
        let a = score_persona(&hello_world(), &persona, &opts);
        let b = score_persona(&hello_world(), &persona, &opts);
        assert_eq!(a, b);
    }

    #[test]
    fn weighting_pulls_scores_toward_heavy_category() {
        let input = hello_world();
        let opts = RuntimeOptions::heuristic_only();
        let equal = score_persona(&input, &PersonaConfig::new("eq"), &opts);
        let clarity_heavy = score_persona(
            &input,
            &PersonaConfig::new("cl").with_weighting(4.0, 1.0, 1.0),
            &opts,
        );
        assert!(clarity_heavy.scores.clarity > equal.scores.clarity);
        assert!(clarity_heavy.scores.uniqueness < equal.scores.uniqueness);
    }

    #[test]
    fn blank_input_uses_low_confidence() {
        let input = EvaluationInput::default();
        let out = score_persona(&input, &PersonaConfig::new("a"), &RuntimeOptions::heuristic_only());
        assert!((out.confidence - EMPTY_INPUT_CONFIDENCE).abs() < 1e-9);
        assert_eq!(out.evidence, vec![Evidence::quote("(no summary provided)")]);
    }

    #[test]
    fn evidence_prefers_densest_slide() {
        let input = EvaluationInput {
            slides_struct: vec![slide(1, 10, 0, 0), slide(2, 8, 4, 0), slide(3, 12, 0, 0)],
            ..EvaluationInput::default()
        };
        let ev = select_evidence(&input, 3);
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].slide, Some(3));
    }

    #[test]
    fn evidence_tie_prefers_lowest_index() {
        let input = EvaluationInput {
            slides_struct: vec![slide(4, 10, 0, 0), slide(2, 10, 0, 0)],
            ..EvaluationInput::default()
        };
        assert_eq!(select_evidence(&input, 1)[0].slide, Some(2));
    }

    #[test]
    fn evidence_falls_back_to_slide_line_then_summary() {
        let from_text = EvaluationInput {
            slides_text: "intro\nSlide 7: Pricing tiers\n".into(),
            ..EvaluationInput::default()
        };
        assert_eq!(
            select_evidence(&from_text, 3),
            vec![Evidence::slide(7, "Pricing tiers")]
        );

        let from_summary = EvaluationInput {
            summary: "A deck about pricing".into(),
            ..EvaluationInput::default()
        };
        assert_eq!(
            select_evidence(&from_summary, 3),
            vec![Evidence::quote("A deck about pricing")]
        );
        assert!(select_evidence(&from_summary, 0).is_empty());
    }

    #[test]
    fn high_detail_adds_slide_evaluations() {
        let mut opts = RuntimeOptions::heuristic_only();
        opts.detail = Detail::High;
        let input = EvaluationInput {
            slides_text: "Slide 1: Dense".into(),
            slides_struct: vec![slide(1, 120, 0, 0), slide(2, 20, 1, 0)],
            ..EvaluationInput::default()
        };
        let out = score_persona(&input, &PersonaConfig::new("a"), &opts);
        let evals = out.slide_evaluations.unwrap();
        assert_eq!(evals.len(), 2);
        assert!(evals[0].comment.starts_with("dense"));
        assert!(evals[1].comment.contains("chart"));
    }

    #[test]
    fn reshuffle_moves_visuals_forward() {
        let input = EvaluationInput {
            slides_struct: vec![
                slide(1, 5, 0, 0),
                slide(2, 90, 0, 0),
                slide(3, 10, 1, 0),
                slide(4, 5, 0, 0),
            ],
            ..EvaluationInput::default()
        };
        let suggestion = suggest_structure(&input);
        assert_eq!(suggestion.proposed_order, vec![1, 3, 2, 4]);
        assert_eq!(suggestion.moves.len(), 2);
        assert_eq!(suggestion.split_candidates, vec![2]);
    }

    #[test]
    fn arc_shapes() {
        let mut calm = slide(1, 5, 0, 0);
        calm.texts = vec!["plain".into()];
        let mut loud = slide(2, 5, 1, 0);
        loud.texts = vec!["Huge win! 300% growth! 40 customers!".into()];
        let input = EvaluationInput {
            slides_struct: vec![calm.clone(), loud, SlideRecord { index: 3, ..calm }],
            ..EvaluationInput::default()
        };
        let arc = emotional_arc(&input);
        assert_eq!(arc.points.len(), 3);
        assert_eq!(arc.shape, ArcShape::Peaked);
        assert_eq!(emotional_arc(&EvaluationInput::default()).shape, ArcShape::Flat);
    }
}
