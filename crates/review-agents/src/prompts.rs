//! Instruction payloads for each backend call.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever preamble content
//! changes, so logged completions can be traced to the prompt that
//! produced them.

use evaluation::heuristic::truncate_chars;
use evaluation::schema::schema_description;
use evaluation::types::{CoordinatedReview, EmotionalArc, StructureSuggestion};
use evaluation::{Consensus, Detail, EvaluationInput, PersonaConfig, PersonaOutput, RuntimeOptions};

use crate::backend::ChatMessage;

/// Prompt version. Bump on any preamble content change.
pub const PROMPT_VERSION: &str = "1.3.0";

/// Characters of speech script included in a deck digest.
const SPEECH_CHARS: usize = 2_000;
/// Upper bound for a coordinated call covering every persona.
const COORDINATED_MAX_TOKENS: u32 = 4_000;

pub const PERSONA_PREAMBLE: &str = "\
You review presentation decks from one fixed point of view. \
Score the deck on three categories, each an integer from 0 to 100: \
clarity (can the audience follow it), uniqueness (does it say something \
others do not) and persuasiveness (does it move the audience to act).

Rules:
- Cite evidence as slide numbers with short quotes taken from the deck.
- `confidence` is your confidence in the assessment, from 0 to 1.
- Reply with a single JSON object matching the schema. No prose outside it.";

pub const MERGE_PREAMBLE: &str = "\
You merge several reviewers' assessments of one presentation deck into a \
consensus. You receive each reviewer's JSON output and a statistical draft. \
Keep `overall_score` close to the draft unless the reviewers clearly justify \
otherwise. At most 3 `top_todos` and at most 2 `what_if` entries. \
Reply with a single JSON object matching the schema. No prose outside it.";

pub const COORDINATED_PREAMBLE: &str = "\
You coordinate a panel of reviewers assessing one presentation deck. \
Produce one assessment per listed reviewer, in that reviewer's voice and \
weighting, plus an optional consensus. Every reviewer id must appear exactly \
once in `personas`. Scores are integers from 0 to 100, confidence from 0 to 1. \
Reply with a single JSON object matching the schema. No prose outside it.";

pub const RESHUFFLE_PREAMBLE: &str = "\
You restructure presentation decks. Propose a slide order that tells the \
story most effectively, list each moved slide with its 1-based target \
position and a reason, and flag slides that should be split. \
Reply with a single JSON object matching the schema. No prose outside it.";

pub const ARC_PREAMBLE: &str = "\
You chart the emotional arc of a presentation. For every slide give an \
intensity from 0 to 100 and a one-word label, then classify the overall \
shape as rising, falling, peaked or flat. \
Reply with a single JSON object matching the schema. No prose outside it.";

/// Token budget for one persona's answer.
pub fn max_tokens(detail: Detail) -> u32 {
    match detail {
        Detail::Low => 500,
        Detail::Normal => 900,
        Detail::High => 1_400,
    }
}

pub fn coordinated_max_tokens(detail: Detail, personas: usize) -> u32 {
    (max_tokens(detail) * personas.max(1) as u32).min(COORDINATED_MAX_TOKENS)
}

fn detail_instruction(detail: Detail) -> &'static str {
    match detail {
        Detail::Low => "Keep summary and comment to one sentence each.",
        Detail::Normal => "Keep summary and comment to two or three sentences each.",
        Detail::High => {
            "Write a thorough summary and comment, and add `slide_evaluations` \
             with one short comment per slide."
        }
    }
}

/// Role, tone, weighting and dealbreakers for one persona.
pub fn persona_profile(persona: &PersonaConfig) -> String {
    let [clarity, uniqueness, persuasiveness] = persona.weighting.shares();
    let mut profile = format!(
        "Reviewer id: {}\nRole: {}\n",
        persona.persona_id,
        persona.display_role()
    );
    if !persona.tone.trim().is_empty() {
        profile.push_str(&format!("Tone: {}\n", persona.tone.trim()));
    }
    profile.push_str(&format!(
        "Weighting: clarity {:.0}%, uniqueness {:.0}%, persuasiveness {:.0}%\n",
        clarity * 100.0,
        uniqueness * 100.0,
        persuasiveness * 100.0
    ));
    if !persona.dealbreakers.is_empty() {
        profile.push_str(&format!("Dealbreakers: {}\n", persona.dealbreakers.join("; ")));
    }
    profile
}

/// Summary, slide list, flattened text and speech, within the text limit.
pub fn deck_digest(input: &EvaluationInput, opts: &RuntimeOptions) -> String {
    let mut digest = String::new();
    if !input.summary.trim().is_empty() {
        digest.push_str(&format!("## Summary\n{}\n\n", input.summary.trim()));
    }
    if !input.slides_struct.is_empty() {
        digest.push_str("## Slides\n");
        for slide in &input.slides_struct {
            digest.push_str(&format!(
                "- #{} {} ({} words, {} charts, {} images)\n",
                slide.index,
                slide.headline().unwrap_or("(untitled)"),
                slide.word_count,
                slide.chart_count,
                slide.image_count
            ));
        }
        digest.push('\n');
    }
    let text = truncate_chars(input.slides_text.trim(), opts.slides_text_limit);
    if !text.is_empty() {
        digest.push_str(&format!("## Slide text\n{text}\n\n"));
    }
    if let Some(speech) = input.speech() {
        digest.push_str(&format!(
            "## Speech script\n{}\n",
            truncate_chars(speech, SPEECH_CHARS)
        ));
    }
    digest
}

pub fn persona_messages(
    input: &EvaluationInput,
    persona: &PersonaConfig,
    opts: &RuntimeOptions,
) -> Vec<ChatMessage> {
    let system = format!(
        "{PERSONA_PREAMBLE}\n\n{}\nAt most {} evidence entries.\n\nSchema:\n{}",
        detail_instruction(opts.detail),
        opts.evidence_max,
        schema_description::<PersonaOutput>()
    );
    let user = format!("{}\n{}", persona_profile(persona), deck_digest(input, opts));
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn merge_messages(personas: &[PersonaOutput], draft: &Consensus) -> Vec<ChatMessage> {
    let system = format!(
        "{MERGE_PREAMBLE}\n\nSchema:\n{}",
        schema_description::<Consensus>()
    );
    let user = format!(
        "## Reviewer outputs\n{}\n\n## Statistical draft\n{}",
        serde_json::to_string_pretty(personas).unwrap_or_default(),
        serde_json::to_string_pretty(draft).unwrap_or_default()
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn coordinated_messages(
    input: &EvaluationInput,
    personas: &[PersonaConfig],
    opts: &RuntimeOptions,
) -> Vec<ChatMessage> {
    let system = format!(
        "{COORDINATED_PREAMBLE}\n\n{}\nAt most {} evidence entries per reviewer.\n\nSchema:\n{}",
        detail_instruction(opts.detail),
        opts.evidence_max,
        schema_description::<CoordinatedReview>()
    );
    let panel: Vec<String> = personas.iter().map(persona_profile).collect();
    let user = format!(
        "## Reviewers\n{}\n{}",
        panel.join("\n"),
        deck_digest(input, opts)
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn reshuffle_messages(input: &EvaluationInput, opts: &RuntimeOptions) -> Vec<ChatMessage> {
    let system = format!(
        "{RESHUFFLE_PREAMBLE}\n\nSchema:\n{}",
        schema_description::<StructureSuggestion>()
    );
    vec![
        ChatMessage::system(system),
        ChatMessage::user(deck_digest(input, opts)),
    ]
}

pub fn arc_messages(input: &EvaluationInput, opts: &RuntimeOptions) -> Vec<ChatMessage> {
    let system = format!(
        "{ARC_PREAMBLE}\n\nSchema:\n{}",
        schema_description::<EmotionalArc>()
    );
    vec![
        ChatMessage::system(system),
        ChatMessage::user(deck_digest(input, opts)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use evaluation::SlideRecord;

    fn input() -> EvaluationInput {
        let mut slide = SlideRecord::new(1, "Problem");
        slide.word_count = 12;
        EvaluationInput {
            summary: "Seed pitch".into(),
            slides_text: "Slide 1: Problem\nSlide 2: Solution".into(),
            slides_struct: vec![slide],
            speech_text: Some("Good morning".into()),
        }
    }

    #[test]
    fn profile_lists_weight_percentages_and_dealbreakers() {
        let mut persona = PersonaConfig::new("vc")
            .with_role("Seed investor")
            .with_tone("skeptical")
            .with_weighting(1.0, 1.0, 2.0);
        persona.dealbreakers = vec!["no traction".into()];
        let profile = persona_profile(&persona);
        assert!(profile.contains("Role: Seed investor"));
        assert!(profile.contains("Tone: skeptical"));
        assert!(profile.contains("clarity 25%, uniqueness 25%, persuasiveness 50%"));
        assert!(profile.contains("Dealbreakers: no traction"));
    }

    #[test]
    fn digest_respects_text_limit() {
        let mut opts = RuntimeOptions::default();
        opts.slides_text_limit = 7;
        let digest = deck_digest(&input(), &opts);
        assert!(digest.contains("## Slide text\nSlide 1\n"));
        assert!(!digest.contains("Solution"));
        assert!(digest.contains("- #1 Problem (12 words"));
        assert!(digest.contains("Good morning"));
    }

    #[test]
    fn persona_prompt_embeds_schema_and_detail() {
        let mut opts = RuntimeOptions::default();
        opts.detail = Detail::High;
        let messages = persona_messages(&input(), &PersonaConfig::new("a"), &opts);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("slide_evaluations"));
        assert!(messages[0].content.contains("\"confidence\""));
        assert!(messages[1].content.contains("Reviewer id: a"));
    }

    #[test]
    fn token_budgets_scale_with_detail() {
        assert!(max_tokens(Detail::Low) < max_tokens(Detail::Normal));
        assert!(max_tokens(Detail::Normal) < max_tokens(Detail::High));
        assert_eq!(coordinated_max_tokens(Detail::High, 10), 4_000);
        assert_eq!(coordinated_max_tokens(Detail::Low, 2), 1_000);
    }
}
