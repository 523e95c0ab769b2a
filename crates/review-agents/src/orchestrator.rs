//! Fan-out of one review request to every persona, fan-in to a consensus.
//!
//! ```text
//! Strategy plan (first success wins):
//!   Coordinated   one backend call answers as every persona   (merge budget)
//!   Independent   JoinSet::spawn(PersonaEvaluator) × N         (never fails)
//!
//! Consensus:
//!   ConsensusPolicy::build ──► optional backend merge (merge budget, validated)
//! ```
//!
//! Blocking mode returns personas in configuration order. Streaming mode
//! emits each persona as it resolves, then the consensus, then `done`.
//! Dropping an [`EvaluationStream`] cancels the run and aborts pending
//! persona tasks.

use std::sync::Arc;

use evaluation::heuristic;
use evaluation::resilience::{degenerate_signal, sentinel_output, DegradationLevel};
use evaluation::types::{CoordinatedReview, EmotionalArc, StructureSuggestion};
use evaluation::{
    AnalysisResponse, Consensus, EvaluationInput, InputError, PersonaConfig, PersonaOutput,
    RuntimeOptions, SoftFailure, StreamEvent, Strategy,
};
use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::{BackendRegistry, EvaluationBackend};
use crate::evaluator::{PersonaEvaluator, PersonaOutcome};

#[derive(Debug, Clone)]
pub struct EvaluationOrchestrator {
    backend: EvaluationBackend,
    evaluator: PersonaEvaluator,
}

/// Receiving end of a streaming run. Dropping it cancels the run.
pub struct EvaluationStream {
    rx: mpsc::Receiver<StreamEvent>,
    _cancel: DropGuard,
}

impl EvaluationStream {
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Adapt into a `futures::Stream`; the drop guard travels with it.
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        futures::stream::unfold(self, |mut stream| async move {
            let event = stream.next().await?;
            Some((event, stream))
        })
    }
}

impl std::fmt::Debug for EvaluationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationStream").finish_non_exhaustive()
    }
}

impl EvaluationOrchestrator {
    pub fn new(backend: EvaluationBackend) -> Self {
        Self {
            evaluator: PersonaEvaluator::new(backend.clone()),
            backend,
        }
    }

    /// Orchestrator for one request: looks up the requested provider only
    /// when the backend is enabled.
    pub fn for_request(registry: &BackendRegistry, opts: &RuntimeOptions) -> Self {
        let backend = if opts.use_llm {
            registry.get(opts.provider)
        } else {
            None
        };
        Self::new(EvaluationBackend::new(backend))
    }

    fn backend_enabled(&self, opts: &RuntimeOptions) -> bool {
        opts.use_llm && self.backend.is_available()
    }

    fn plan(&self, opts: &RuntimeOptions) -> Vec<Strategy> {
        Strategy::plan(opts.use_coordinated && self.backend_enabled(opts))
    }

    /// Evaluate every persona and wait for all of them.
    pub async fn evaluate_blocking(
        &self,
        input: EvaluationInput,
        personas: &[PersonaConfig],
        opts: &RuntimeOptions,
    ) -> Result<AnalysisResponse, InputError> {
        check_request(&input, personas)?;
        let run_id = Uuid::new_v4();
        let span = info_span!("review", %run_id, mode = "blocking");

        async move {
            info!(personas = personas.len(), "evaluation started");
            let input = Arc::new(input);
            let opts_shared = Arc::new(opts.clone());

            let mut outputs = Vec::new();
            let mut proposed = None;
            for strategy in self.plan(opts) {
                match strategy {
                    Strategy::Coordinated => match self.coordinated(&input, personas, opts).await {
                        Ok(review) => {
                            outputs = review.personas;
                            proposed = review.consensus;
                            break;
                        }
                        Err(failure) => {
                            warn!(%failure, "coordinated review unusable, falling back");
                        }
                    },
                    Strategy::Independent => {
                        outputs = self
                            .fan_out(Arc::clone(&input), personas, Arc::clone(&opts_shared), None)
                            .await
                            .unwrap_or_default();
                    }
                }
            }

            let consensus = self.consensus(&outputs, proposed, opts).await;
            info!(overall = consensus.overall_score, "evaluation finished");

            let mut response = AnalysisResponse::new(outputs, consensus);
            if !input.slides_struct.is_empty() {
                response = response.with_slides(input.slides_struct.clone());
            }
            Ok(response)
        }
        .instrument(span)
        .await
    }

    /// Start a streaming run. Events arrive in completion order; the
    /// consensus is always the last message, followed by `done`.
    pub fn evaluate_streaming(
        &self,
        input: EvaluationInput,
        personas: Vec<PersonaConfig>,
        opts: RuntimeOptions,
    ) -> Result<EvaluationStream, InputError> {
        check_request(&input, &personas)?;

        let token = CancellationToken::new();
        let cancel = token.clone().drop_guard();
        let (tx, rx) = mpsc::channel(personas.len() + 2);
        let this = self.clone();
        let span = info_span!("review", run_id = %Uuid::new_v4(), mode = "streaming");

        tokio::spawn(
            async move {
                tokio::select! {
                    _ = token.cancelled() => info!("stream cancelled by caller"),
                    _ = this.drive_stream(input, personas, opts, tx) => {}
                }
            }
            .instrument(span),
        );

        Ok(EvaluationStream {
            rx,
            _cancel: cancel,
        })
    }

    async fn drive_stream(
        &self,
        input: EvaluationInput,
        personas: Vec<PersonaConfig>,
        opts: RuntimeOptions,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        info!(personas = personas.len(), "evaluation started");
        let input = Arc::new(input);
        let opts_shared = Arc::new(opts.clone());

        let mut outputs = Vec::new();
        let mut proposed = None;
        for strategy in self.plan(&opts) {
            match strategy {
                Strategy::Coordinated => match self.coordinated(&input, &personas, &opts).await {
                    Ok(review) => {
                        for output in &review.personas {
                            if tx.send(StreamEvent::persona(output.clone())).await.is_err() {
                                return;
                            }
                        }
                        outputs = review.personas;
                        proposed = review.consensus;
                        break;
                    }
                    Err(failure) => {
                        warn!(%failure, "coordinated review unusable, falling back");
                    }
                },
                Strategy::Independent => {
                    match self
                        .fan_out(Arc::clone(&input), &personas, Arc::clone(&opts_shared), Some(&tx))
                        .await
                    {
                        Some(resolved) => outputs = resolved,
                        None => {
                            debug!("receiver gone, abandoning pending personas");
                            return;
                        }
                    }
                }
            }
        }

        let consensus = self.consensus(&outputs, proposed, &opts).await;
        info!(overall = consensus.overall_score, "evaluation finished");
        if tx.send(StreamEvent::consensus(consensus)).await.is_err() {
            return;
        }
        let _ = tx.send(StreamEvent::Done).await;
    }

    /// Run every persona concurrently. Outputs come back in configuration
    /// order; with `events`, each one is also sent as it resolves. Returns
    /// `None` when the event receiver has gone away (pending tasks are
    /// aborted when the set drops).
    async fn fan_out(
        &self,
        input: Arc<EvaluationInput>,
        personas: &[PersonaConfig],
        opts: Arc<RuntimeOptions>,
        events: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Option<Vec<PersonaOutput>> {
        let mut join_set: JoinSet<(usize, PersonaOutcome)> = JoinSet::new();
        for (index, persona) in personas.iter().cloned().enumerate() {
            let evaluator = self.evaluator.clone();
            let input = Arc::clone(&input);
            let opts = Arc::clone(&opts);
            join_set.spawn(
                async move { (index, evaluator.run(&input, &persona, &opts).await) }
                    .in_current_span(),
            );
        }

        let mut slots: Vec<Option<PersonaOutput>> = vec![None; personas.len()];
        let (mut partial, mut unavailable) = (0usize, 0usize);
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((index, outcome)) => {
                    match outcome.resolution.level() {
                        DegradationLevel::Full => {}
                        DegradationLevel::Partial => partial += 1,
                        DegradationLevel::Unavailable => unavailable += 1,
                    }
                    if let Some(tx) = events {
                        if tx.send(StreamEvent::persona(outcome.output.clone())).await.is_err() {
                            return None;
                        }
                    }
                    slots[index] = Some(outcome.output);
                }
                Err(e) => {
                    warn!(error = %e, "persona task panicked");
                }
            }
        }

        let mut outputs = Vec::with_capacity(personas.len());
        for (slot, persona) in slots.into_iter().zip(personas) {
            let output = match slot {
                Some(output) => output,
                None => {
                    unavailable += 1;
                    let sentinel = sentinel_output(persona.persona_id.clone());
                    if let Some(tx) = events {
                        if tx.send(StreamEvent::persona(sentinel.clone())).await.is_err() {
                            return None;
                        }
                    }
                    sentinel
                }
            };
            outputs.push(output);
        }

        info!(total = outputs.len(), partial, unavailable, "personas resolved");
        Some(outputs)
    }

    /// Single coordinated call. Must cover every configured persona exactly
    /// once with a plausible answer.
    async fn coordinated(
        &self,
        input: &EvaluationInput,
        personas: &[PersonaConfig],
        opts: &RuntimeOptions,
    ) -> Result<CoordinatedReview, SoftFailure> {
        let review = tokio::time::timeout(
            opts.merge_timeout,
            self.backend.coordinate(input, personas, opts),
        )
        .await
        .map_err(|_| SoftFailure::Timeout {
            after_ms: opts.merge_timeout.as_millis() as u64,
        })??;

        let mut ordered = Vec::with_capacity(personas.len());
        for persona in personas {
            let mut matches = review
                .personas
                .iter()
                .filter(|p| p.persona_id == persona.persona_id);
            match (matches.next(), matches.next()) {
                (Some(output), None) => {
                    if let Some(signal) = degenerate_signal(output) {
                        return Err(SoftFailure::Degenerate(signal));
                    }
                    let mut output = output.clone();
                    output.evidence.truncate(opts.evidence_max);
                    ordered.push(output);
                }
                _ => {
                    return Err(SoftFailure::Incomplete {
                        expected: personas.len(),
                        got: ordered.len(),
                    })
                }
            }
        }

        debug!(personas = ordered.len(), "coordinated review accepted");
        Ok(CoordinatedReview {
            personas: ordered,
            consensus: review.consensus,
        })
    }

    /// Statistical consensus, replaced by a validated backend merge when one
    /// is available. A consensus proposed by a coordinated review wins when
    /// the policy admits it.
    async fn consensus(
        &self,
        outputs: &[PersonaOutput],
        proposed: Option<Consensus>,
        opts: &RuntimeOptions,
    ) -> Consensus {
        let policy = self.backend.policy();
        if let Some(consensus) = proposed {
            if policy.admits(&consensus) {
                return consensus;
            }
            warn!("coordinated consensus outside policy bounds, rebuilding");
        }
        let statistical = policy.build(outputs);
        if !self.backend_enabled(opts) {
            return statistical;
        }

        match tokio::time::timeout(opts.merge_timeout, self.backend.merge(outputs, opts)).await {
            Ok(Ok(merged)) if policy.admits(&merged) => {
                debug!("backend merge accepted");
                merged
            }
            Ok(Ok(_)) => {
                warn!("backend merge outside policy bounds, keeping statistical consensus");
                statistical
            }
            Ok(Err(failure)) => {
                warn!(%failure, "backend merge unusable, keeping statistical consensus");
                statistical
            }
            Err(_) => {
                warn!(
                    after_ms = opts.merge_timeout.as_millis() as u64,
                    "backend merge timed out, keeping statistical consensus"
                );
                statistical
            }
        }
    }

    /// Reorder suggestion, from the backend when enabled, else heuristic.
    pub async fn reshuffle(
        &self,
        input: &EvaluationInput,
        opts: &RuntimeOptions,
    ) -> Result<StructureSuggestion, InputError> {
        if !input.has_slide_content() {
            return Err(InputError::EmptySlides);
        }
        if self.backend_enabled(opts) {
            match tokio::time::timeout(opts.merge_timeout, self.backend.reshuffle(input, opts)).await
            {
                Ok(Ok(suggestion)) => return Ok(suggestion),
                Ok(Err(failure)) => warn!(%failure, "backend reshuffle unusable"),
                Err(_) => warn!("backend reshuffle timed out"),
            }
        }
        Ok(heuristic::suggest_structure(input))
    }

    /// Emotional arc, from the backend when enabled, else heuristic.
    pub async fn emotional_arc(
        &self,
        input: &EvaluationInput,
        opts: &RuntimeOptions,
    ) -> Result<EmotionalArc, InputError> {
        if !input.has_slide_content() {
            return Err(InputError::EmptySlides);
        }
        if self.backend_enabled(opts) {
            match tokio::time::timeout(opts.merge_timeout, self.backend.emotional_arc(input, opts))
                .await
            {
                Ok(Ok(arc)) => return Ok(arc),
                Ok(Err(failure)) => warn!(%failure, "backend emotional arc unusable"),
                Err(_) => warn!("backend emotional arc timed out"),
            }
        }
        Ok(heuristic::emotional_arc(input))
    }
}

fn check_request(input: &EvaluationInput, personas: &[PersonaConfig]) -> Result<(), InputError> {
    if personas.is_empty() {
        return Err(InputError::NoPersonas);
    }
    if !input.has_slide_content() {
        return Err(InputError::EmptySlides);
    }
    Ok(())
}
