//! Scripted in-process completion backend shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evaluation::{EvaluationInput, PersonaConfig, RuntimeOptions, SlideRecord};
use review_agents::backend::{BackendError, ChatRequest, CompletionBackend};
use review_agents::prompts::{COORDINATED_PREAMBLE, MERGE_PREAMBLE};
use serde_json::json;

/// What the scripted backend does for one request.
pub enum Reply {
    Text(String),
    Fail,
    After(Duration, String),
}

/// Which call a request represents, recovered from its prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Persona(String),
    Merge,
    Coordinated,
    Other,
}

pub fn classify(request: &ChatRequest) -> Call {
    let system = &request.messages[0].content;
    if system.starts_with(COORDINATED_PREAMBLE) {
        return Call::Coordinated;
    }
    if system.starts_with(MERGE_PREAMBLE) {
        return Call::Merge;
    }
    let reviewer = request
        .messages
        .get(1)
        .and_then(|m| m.content.lines().find_map(|l| l.strip_prefix("Reviewer id: ")));
    match reviewer {
        Some(id) => Call::Persona(id.to_string()),
        None => Call::Other,
    }
}

type Script = dyn Fn(&Call) -> Reply + Send + Sync;

pub struct ScriptedBackend {
    script: Box<Script>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: impl Fn(&Call) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match (self.script)(&classify(&request)) {
            Reply::Text(text) => Ok(text),
            Reply::Fail => Err(BackendError::Status {
                status: 503,
                body: "upstream unavailable".into(),
            }),
            Reply::After(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
        }
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

pub fn deck() -> EvaluationInput {
    let mut problem = SlideRecord::new(1, "The problem");
    problem.texts = vec!["Teams lose 6 hours a week to status meetings".into()];
    problem.word_count = 9;
    let mut traction = SlideRecord::new(2, "Traction");
    traction.texts = vec!["We grew 40% month over month!".into()];
    traction.word_count = 6;
    traction.chart_count = 1;
    let mut ask = SlideRecord::new(3, "The ask");
    ask.texts = vec!["Raising $2M to reach 500 customers".into()];
    ask.word_count = 6;

    EvaluationInput {
        summary: "Seed pitch for an async standup tool".into(),
        slides_text: "Slide 1: The problem\nTeams lose 6 hours a week to status meetings.\n\
                      Slide 2: Traction\nWe grew 40% month over month!\n\
                      Slide 3: The ask\nRaising $2M to reach 500 customers."
            .into(),
        slides_struct: vec![problem, traction, ask],
        speech_text: None,
    }
}

pub fn panel(ids: &[&str]) -> Vec<PersonaConfig> {
    ids.iter()
        .map(|id| PersonaConfig::new(*id).with_role(format!("{id} reviewer")))
        .collect()
}

pub fn backend_opts() -> RuntimeOptions {
    RuntimeOptions::default().without_jitter()
}

pub fn persona_json(score: u32, confidence: f64) -> String {
    json!({
        "summary": "Clear problem and a credible ask",
        "scores": { "clarity": score, "uniqueness": score, "persuasiveness": score },
        "comment": "Open with the traction chart",
        "evidence": [{ "slide": 2, "quote": "We grew 40% month over month!" }],
        "confidence": confidence
    })
    .to_string()
}

pub fn consensus_json(overall: u32) -> String {
    json!({
        "agreements": ["the ask is concrete"],
        "disagreements": [],
        "overall_score": overall,
        "top_todos": ["lead with traction"],
        "what_if": [{ "change": "lead with traction", "expected_gain": 6, "uncertainty": 2 }]
    })
    .to_string()
}
