//! Evaluation core for multi-persona presentation review.
//!
//! This crate is synchronous and does no I/O beyond reading persona files.
//! It provides:
//! - The review data model (`types`) and per-request options (`options`)
//! - Request parsing and the input-error boundary (`request`)
//! - Schema validation and repair of untrusted backend output (`schema`)
//! - The deterministic heuristic scorer (`heuristic`)
//! - Cross-persona consensus aggregation (`consensus`)
//! - Soft-failure taxonomy and degenerate-output detection (`resilience`)
//! - The as-completed streaming protocol (`events`)
//!
//! The async runtime (backends, fan-out, HTTP) lives in `review-agents`.
//!
//! # Flow
//!
//! ```text
//! request JSON ─► parse_request ─► (EvaluationInput, RuntimeOptions)
//!                                        │
//!          backend text ─► schema::validate_or_repair ─┐   heuristic::score_persona
//!                                                      ▼           │
//!                                             PersonaOutput ◄──────┘
//!                                                      │
//!                                      consensus::build ─► Consensus ─► AnalysisResponse / events
//! ```

pub mod consensus;
pub mod error;
pub mod events;
pub mod heuristic;
pub mod options;
pub mod persona;
pub mod request;
pub mod resilience;
pub mod schema;
pub mod types;

pub use consensus::ConsensusPolicy;
pub use error::{ConfigError, InputError};
pub use events::{StreamEvent, StreamMessage, StreamReader};
pub use options::{Detail, ProviderKind, RuntimeOptions};
pub use persona::PersonaSet;
pub use request::parse_request;
pub use resilience::{Resolution, SoftFailure, Strategy};
pub use schema::validate_or_repair;
pub use types::{
    AnalysisResponse, Consensus, EvaluationInput, Evidence, PersonaConfig, PersonaOutput, Score,
    SlideRecord,
};
