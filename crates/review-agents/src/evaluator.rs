//! Per-persona evaluation with a bounded budget and guaranteed resolution.
//!
//! ```text
//! pending ──(use_llm && backend)──► jitter ──► backend call (timeout)
//!    │                                              │
//!    │                       ┌──────────────────────┼──────────────────────┐
//!    │                       ▼                      ▼                      ▼
//!    │                   accepted              degenerate               failed
//!    │                       │                      └──────► heuristic ◄───┘
//!    └──(no backend)──► heuristic                              │
//!                            │                                 │
//!                            └────────────► resolved ◄─────────┘
//! ```
//!
//! [`PersonaEvaluator::run`] never fails: every path ends with a
//! `PersonaOutput` for the configured persona id.

use std::time::{Duration, Instant};

use evaluation::heuristic;
use evaluation::resilience::{degenerate_signal, sentinel_output};
use evaluation::{EvaluationInput, PersonaConfig, PersonaOutput, Resolution, RuntimeOptions, SoftFailure};
use rand::Rng;
use tracing::{debug, warn};

use crate::backend::EvaluationBackend;

/// A resolved persona run.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaOutcome {
    pub output: PersonaOutput,
    pub resolution: Resolution,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct PersonaEvaluator {
    backend: EvaluationBackend,
}

impl PersonaEvaluator {
    pub fn new(backend: EvaluationBackend) -> Self {
        Self { backend }
    }

    /// Whether runs with `opts` will call the backend.
    pub fn uses_backend(&self, opts: &RuntimeOptions) -> bool {
        opts.use_llm && self.backend.is_available()
    }

    pub async fn run(
        &self,
        input: &EvaluationInput,
        persona: &PersonaConfig,
        opts: &RuntimeOptions,
    ) -> PersonaOutcome {
        let start = Instant::now();
        let resolve = |output: PersonaOutput, resolution: Resolution| {
            debug!(
                persona_id = %output.persona_id,
                resolution = %resolution,
                level = %resolution.level(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "persona resolved"
            );
            PersonaOutcome {
                output,
                resolution,
                elapsed: start.elapsed(),
            }
        };

        if persona.persona_id.trim().is_empty() {
            warn!("persona without an id; returning sentinel output");
            return resolve(sentinel_output(persona.persona_id.clone()), Resolution::Sentinel);
        }

        if !self.uses_backend(opts) {
            return resolve(
                heuristic::score_persona(input, persona, opts),
                Resolution::Heuristic,
            );
        }

        jitter(opts.jitter_ms).await;

        let failure = match tokio::time::timeout(
            opts.persona_timeout,
            self.backend.evaluate(input, persona, opts),
        )
        .await
        {
            Ok(Ok(output)) => match degenerate_signal(&output) {
                None => return resolve(output, Resolution::Accepted),
                Some(signal) => SoftFailure::Degenerate(signal),
            },
            Ok(Err(failure)) => failure,
            Err(_) => SoftFailure::Timeout {
                after_ms: opts.persona_timeout.as_millis() as u64,
            },
        };

        let resolution = match failure {
            SoftFailure::Degenerate(_) => Resolution::Degenerate,
            _ => Resolution::Failed,
        };
        warn!(
            persona_id = %persona.persona_id,
            failure = %failure,
            "backend evaluation unusable, recomputing heuristically"
        );
        resolve(heuristic::score_persona(input, persona, opts), resolution)
    }
}

/// Random start-up delay within `(min_ms, max_ms)`. `max_ms == 0` disables.
async fn jitter((min_ms, max_ms): (u64, u64)) {
    if max_ms == 0 {
        return;
    }
    let delay = rand::thread_rng().gen_range(min_ms.min(max_ms)..=max_ms);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}
