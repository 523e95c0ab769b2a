//! Evaluation operations on top of an optional completion backend.
//!
//! Without a backend, `evaluate`, `merge`, `reshuffle` and `emotional_arc`
//! resolve through the deterministic heuristics. With one, every answer goes
//! through schema validation and any problem comes back as a
//! [`SoftFailure`] for the caller's fallback policy to handle.

use std::sync::Arc;

use evaluation::consensus::ConsensusPolicy;
use evaluation::heuristic;
use evaluation::schema::{validate_or_repair, Shape};
use evaluation::types::{CoordinatedReview, EmotionalArc, StructureSuggestion};
use evaluation::{
    Consensus, EvaluationInput, PersonaConfig, PersonaOutput, RuntimeOptions, SoftFailure,
};
use tracing::{debug, warn};

use super::{ChatRequest, CompletionBackend, ResponseFormat};
use crate::prompts;

#[derive(Clone)]
pub struct EvaluationBackend {
    backend: Option<Arc<dyn CompletionBackend>>,
    policy: ConsensusPolicy,
}

impl EvaluationBackend {
    pub fn new(backend: Option<Arc<dyn CompletionBackend>>) -> Self {
        Self {
            backend,
            policy: ConsensusPolicy::default(),
        }
    }

    /// Heuristics only; never touches the network.
    pub fn heuristic() -> Self {
        Self::new(None)
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn policy(&self) -> &ConsensusPolicy {
        &self.policy
    }

    /// Evaluate one persona. The configured id is stamped on the result.
    pub async fn evaluate(
        &self,
        input: &EvaluationInput,
        persona: &PersonaConfig,
        opts: &RuntimeOptions,
    ) -> Result<PersonaOutput, SoftFailure> {
        let Some(backend) = &self.backend else {
            return Ok(heuristic::score_persona(input, persona, opts));
        };
        let request = ChatRequest {
            model: opts.persona_model.clone(),
            messages: prompts::persona_messages(input, persona, opts),
            response_format: ResponseFormat::json_object(),
            max_tokens: prompts::max_tokens(opts.detail),
        };
        let mut output: PersonaOutput = ask(backend.as_ref(), request).await?;
        output.persona_id = persona.persona_id.clone();
        output.evidence.truncate(opts.evidence_max);
        Ok(output)
    }

    /// Merge persona outputs into a consensus.
    pub async fn merge(
        &self,
        personas: &[PersonaOutput],
        opts: &RuntimeOptions,
    ) -> Result<Consensus, SoftFailure> {
        let draft = self.policy.build(personas);
        let Some(backend) = &self.backend else {
            return Ok(draft);
        };
        let request = ChatRequest {
            model: opts.merge_model.clone(),
            messages: prompts::merge_messages(personas, &draft),
            response_format: ResponseFormat::json_object(),
            max_tokens: prompts::max_tokens(opts.detail),
        };
        ask(backend.as_ref(), request).await
    }

    /// One call reviewing as every persona. Requires a backend.
    pub async fn coordinate(
        &self,
        input: &EvaluationInput,
        personas: &[PersonaConfig],
        opts: &RuntimeOptions,
    ) -> Result<CoordinatedReview, SoftFailure> {
        let backend = self.backend.as_ref().ok_or(SoftFailure::NoBackend)?;
        let request = ChatRequest {
            model: opts.merge_model.clone(),
            messages: prompts::coordinated_messages(input, personas, opts),
            response_format: ResponseFormat::json_object(),
            max_tokens: prompts::coordinated_max_tokens(opts.detail, personas.len()),
        };
        ask(backend.as_ref(), request).await
    }

    pub async fn reshuffle(
        &self,
        input: &EvaluationInput,
        opts: &RuntimeOptions,
    ) -> Result<StructureSuggestion, SoftFailure> {
        let Some(backend) = &self.backend else {
            return Ok(heuristic::suggest_structure(input));
        };
        let request = ChatRequest {
            model: opts.merge_model.clone(),
            messages: prompts::reshuffle_messages(input, opts),
            response_format: ResponseFormat::json_object(),
            max_tokens: prompts::max_tokens(opts.detail),
        };
        ask(backend.as_ref(), request).await
    }

    pub async fn emotional_arc(
        &self,
        input: &EvaluationInput,
        opts: &RuntimeOptions,
    ) -> Result<EmotionalArc, SoftFailure> {
        let Some(backend) = &self.backend else {
            return Ok(heuristic::emotional_arc(input));
        };
        let request = ChatRequest {
            model: opts.merge_model.clone(),
            messages: prompts::arc_messages(input, opts),
            response_format: ResponseFormat::json_object(),
            max_tokens: prompts::max_tokens(opts.detail),
        };
        ask(backend.as_ref(), request).await
    }
}

impl std::fmt::Debug for EvaluationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationBackend")
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .finish_non_exhaustive()
    }
}

/// Complete, then validate the raw text as `S`.
async fn ask<S: Shape + Send>(
    backend: &dyn CompletionBackend,
    request: ChatRequest,
) -> Result<S, SoftFailure> {
    let model = request.model.clone();
    let text = backend.complete(request).await.map_err(|e| {
        warn!(backend = backend.name(), model = %model, error = %e, "completion failed");
        SoftFailure::Transport(e.to_string())
    })?;
    debug!(backend = backend.name(), shape = S::NAME, chars = text.len(), "validating completion");
    validate_or_repair::<S>(text.as_str()).ok_or(SoftFailure::Invalid { shape: S::NAME })
}
