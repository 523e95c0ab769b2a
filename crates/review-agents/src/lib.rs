//! Async runtime for multi-persona presentation review.
//!
//! The pure scoring, validation and consensus logic lives in the
//! `evaluation` crate. This crate adds the parts that talk to the outside:
//! completion backends, per-persona budgets, concurrent fan-out, SSE
//! streaming and the HTTP/CLI surfaces.

pub mod backend;
pub mod config;
pub mod evaluator;
pub mod orchestrator;
pub mod prompts;
pub mod server;

pub use backend::{BackendRegistry, CompletionBackend, EvaluationBackend};
pub use config::ServiceConfig;
pub use evaluator::{PersonaEvaluator, PersonaOutcome};
pub use orchestrator::{EvaluationOrchestrator, EvaluationStream};
