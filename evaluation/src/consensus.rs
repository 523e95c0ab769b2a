//! Cross-persona aggregation.
//!
//! Pure: same persona outputs in, same [`Consensus`] out. All thresholds
//! live on [`ConsensusPolicy`]; its `Default` carries the values existing
//! clients expect.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::heuristic::truncate_chars;
use crate::types::{Category, Consensus, PersonaOutput, WhatIf};

/// Order in which categories are checked for disagreement.
const DISAGREEMENT_ORDER: [Category; 3] = [
    Category::Uniqueness,
    Category::Persuasiveness,
    Category::Clarity,
];

/// Mean and spread of one category across personas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryStats {
    pub category: Category,
    /// Mean rounded half away from zero.
    pub mean: u8,
    /// Population standard deviation.
    pub std_dev: f64,
}

/// Policy constants for consensus building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPolicy {
    /// Categories with a rounded mean below this need work.
    pub agreement_threshold: u8,
    /// Categories whose σ exceeds this are reported as disagreements.
    pub disagreement_sigma: f64,
    pub max_disagreements: usize,
    pub max_todos: usize,
    pub max_what_if: usize,
    /// Slide numbers listed in a todo's `focus_slides`.
    pub focus_slides: usize,
    /// Characters of quote carried in a todo hint.
    pub hint_chars: usize,
    /// Overall scores above this are treated as this for gain projection.
    pub gain_ceiling: u8,
    pub gain_min: u32,
    pub gain_max: u32,
    pub what_if_uncertainty: u32,
}

impl Default for ConsensusPolicy {
    fn default() -> Self {
        Self {
            agreement_threshold: 85,
            disagreement_sigma: 8.0,
            max_disagreements: 2,
            max_todos: 3,
            max_what_if: 2,
            focus_slides: 2,
            hint_chars: 40,
            gain_ceiling: 90,
            gain_min: 2,
            gain_max: 12,
            what_if_uncertainty: 2,
        }
    }
}

impl ConsensusPolicy {
    /// Aggregate persona outputs into a consensus.
    pub fn build(&self, personas: &[PersonaOutput]) -> Consensus {
        if personas.is_empty() {
            return Consensus {
                agreements: vec!["no persona assessments available".to_string()],
                disagreements: Vec::new(),
                overall_score: 0,
                top_todos: Vec::new(),
                what_if: Vec::new(),
            };
        }

        let stats = category_stats(personas);
        let overall = overall_score(personas);

        let mut agreements: Vec<String> = stats
            .iter()
            .filter(|s| s.mean < self.agreement_threshold)
            .map(|s| format!("{} avg={}", s.category, s.mean))
            .collect();
        if agreements.is_empty() {
            agreements.push(format!("balanced scores across personas (overall={overall})"));
        }

        let disagreements: Vec<String> = DISAGREEMENT_ORDER
            .iter()
            .map(|c| &stats[c.index()])
            .filter(|s| s.std_dev > self.disagreement_sigma)
            .take(self.max_disagreements)
            .map(|s| format!("{} σ={:.1} (divergent)", s.category, s.std_dev))
            .collect();

        let top_todos = self.top_todos(personas, &stats, overall);

        let gain = self.expected_gain(overall);
        let what_if = top_todos
            .iter()
            .take(self.max_what_if)
            .map(|todo| WhatIf {
                change: todo.clone(),
                expected_gain: gain,
                uncertainty: self.what_if_uncertainty,
            })
            .collect();

        Consensus {
            agreements,
            disagreements,
            overall_score: overall,
            top_todos,
            what_if,
        }
    }

    /// Projected gain from acting on a todo, given the current overall score.
    pub fn expected_gain(&self, overall: u8) -> u32 {
        let deficit = 100.0 - overall.min(self.gain_ceiling) as f64;
        ((deficit / 3.0).round() as u32).clamp(self.gain_min, self.gain_max)
    }

    /// Whether an externally proposed consensus stays within this policy's
    /// list limits and gain range.
    pub fn admits(&self, consensus: &Consensus) -> bool {
        consensus.top_todos.len() <= self.max_todos
            && consensus.what_if.len() <= self.max_what_if
            && consensus
                .what_if
                .iter()
                .all(|w| (self.gain_min..=self.gain_max).contains(&w.expected_gain))
    }

    fn top_todos(
        &self,
        personas: &[PersonaOutput],
        stats: &[CategoryStats; 3],
        overall: u8,
    ) -> Vec<String> {
        let mut ascending = *stats;
        ascending.sort_by_key(|s| s.mean);

        let cited = most_cited_slides(personas);
        let focus = if cited.is_empty() {
            "-".to_string()
        } else {
            cited
                .iter()
                .take(self.focus_slides)
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        let hint = cited
            .first()
            .and_then(|top| first_persona_quote(personas, *top))
            .map(|q| truncate_chars(q.trim(), self.hint_chars).to_string())
            .unwrap_or_default();

        let mut todos: Vec<String> = ascending
            .iter()
            .filter(|s| s.mean < self.agreement_threshold)
            .take(self.max_todos)
            .map(|s| {
                format!(
                    "{}: avg={} (<{}), focus_slides={focus}, hint=\"{hint}\"",
                    s.category, s.mean, self.agreement_threshold
                )
            })
            .collect();
        if todos.is_empty() {
            todos.push(format!("maintain current strengths (overall={overall})"));
        }
        todos
    }
}

/// Aggregate with the default policy.
pub fn build(personas: &[PersonaOutput]) -> Consensus {
    ConsensusPolicy::default().build(personas)
}

/// Per-category rounded mean and population σ, in [`Category::ALL`] order.
pub fn category_stats(personas: &[PersonaOutput]) -> [CategoryStats; 3] {
    Category::ALL.map(|category| {
        let values: Vec<f64> = personas
            .iter()
            .map(|p| p.scores.get(category) as f64)
            .collect();
        let n = values.len().max(1) as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        CategoryStats {
            category,
            mean: round_score(mean),
            std_dev: variance.sqrt(),
        }
    })
}

/// Mean of each persona's own three-category average, rounded.
pub fn overall_score(personas: &[PersonaOutput]) -> u8 {
    if personas.is_empty() {
        return 0;
    }
    let sum: f64 = personas.iter().map(|p| p.scores.average()).sum();
    round_score(sum / personas.len() as f64)
}

fn round_score(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

/// Slide numbers cited across all evidence, by count descending then number.
fn most_cited_slides(personas: &[PersonaOutput]) -> Vec<u32> {
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for slide in personas
        .iter()
        .flat_map(|p| p.evidence.iter())
        .filter_map(|e| e.slide)
    {
        *counts.entry(slide).or_default() += 1;
    }
    let mut ranked: Vec<(u32, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().map(|(slide, _)| slide).collect()
}

// Only the first persona's evidence supplies the quote, even though the
// slide number is ranked across every persona.
fn first_persona_quote(personas: &[PersonaOutput], slide: u32) -> Option<&str> {
    personas
        .first()?
        .evidence
        .iter()
        .find(|e| e.slide == Some(slide))
        .and_then(|e| e.quote.as_deref())
}
