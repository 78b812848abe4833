// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic routing over registry snapshots.
//!
//! `composite = α·semantic_match + β·resource_headroom`, default
//! `α = 0.6, β = 0.4`. Circuit-open modules score zero; ties break in stable
//! module-id order. Given the same snapshot and query, the decision is
//! byte-identical.

use crate::{CircuitState, RegistrySnapshot, SnapshotEntry};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Scoring weights for the router.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouterWeights {
    /// Weight of semantic capability match.
    pub alpha: f64,
    /// Weight of resource headroom.
    pub beta: f64,
}

impl Default for RouterWeights {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta: 0.4,
        }
    }
}

/// A routing query derived from user intent.
#[derive(Debug, Clone, Default)]
pub struct RouteQuery {
    /// Free-text intent, tokenized for capability matching.
    pub text: String,
    /// Capability tags the module must advertise.
    pub required_capabilities: Vec<String>,
}

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RouteCandidate {
    /// Module id.
    pub module_id: String,
    /// Capability/text match score in `[0, 1]`.
    pub semantic_score: f64,
    /// Resource headroom score in `[0, 1]`.
    pub resource_score: f64,
    /// Weighted composite (zero when the circuit is open).
    pub composite_score: f64,
    /// Circuit state at decision time.
    pub circuit_state: CircuitState,
}

/// The router's ranked recommendation.
///
/// Deterministic under a fixed snapshot and query; the orchestrator treats
/// it as advice: the agent decides, the router informs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RoutingDecision {
    /// Candidates in descending composite order (stable id tie-break).
    pub candidates: Vec<RouteCandidate>,
}

impl RoutingDecision {
    /// The top candidate, if any scored above zero.
    #[must_use]
    pub fn best(&self) -> Option<&RouteCandidate> {
        self.candidates.first().filter(|c| c.composite_score > 0.0)
    }
}

/// Compute a routing recommendation for `query` against `snapshot`.
#[must_use]
pub fn recommend(
    query: &RouteQuery,
    snapshot: &RegistrySnapshot,
    weights: RouterWeights,
) -> RoutingDecision {
    let query_tokens = tokenize(&query.text);
    let required: BTreeSet<&str> = query
        .required_capabilities
        .iter()
        .map(String::as_str)
        .collect();

    let mut candidates: Vec<RouteCandidate> = snapshot
        .entries
        .iter()
        .filter(|entry| {
            required.is_empty()
                || required
                    .iter()
                    .all(|cap| entry.capabilities.iter().any(|c| c == cap))
        })
        .map(|entry| score_entry(entry, &query_tokens, weights))
        .collect();

    candidates.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.module_id.cmp(&b.module_id))
    });

    RoutingDecision { candidates }
}

fn score_entry(
    entry: &SnapshotEntry,
    query_tokens: &BTreeSet<String>,
    weights: RouterWeights,
) -> RouteCandidate {
    let semantic_score = semantic_match(entry, query_tokens);
    let resource_score = resource_headroom(entry);
    let composite_score = if entry.circuit == CircuitState::Open {
        0.0
    } else {
        weights.alpha * semantic_score + weights.beta * resource_score
    };
    RouteCandidate {
        module_id: entry.module_id.clone(),
        semantic_score,
        resource_score,
        composite_score,
        circuit_state: entry.circuit,
    }
}

/// Token overlap between the query and the module's id plus capability tags.
fn semantic_match(entry: &SnapshotEntry, query_tokens: &BTreeSet<String>) -> f64 {
    if query_tokens.is_empty() {
        return 0.5;
    }
    let mut module_tokens: BTreeSet<String> = tokenize(&entry.module_id.replace('/', " "));
    for capability in &entry.capabilities {
        module_tokens.extend(tokenize(&capability.replace('_', " ")));
    }
    let hits = query_tokens.intersection(&module_tokens).count();
    hits as f64 / query_tokens.len() as f64
}

/// Headroom from resource hints: modest memory and latency score high;
/// missing hints score neutral.
fn resource_headroom(entry: &SnapshotEntry) -> f64 {
    let memory = entry.resources.memory_mb.map_or(0.5, |mb| {
        (1.0 - (mb as f64 / 1024.0)).clamp(0.0, 1.0)
    });
    let latency = entry.resources.avg_latency_ms.map_or(0.5, |ms| {
        (1.0 - (ms as f64 / 5_000.0)).clamp(0.0, 1.0)
    });
    (memory + latency) / 2.0
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_ascii_lowercase)
        .collect()
}
