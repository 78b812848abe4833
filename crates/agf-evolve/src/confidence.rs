// SPDX-License-Identifier: MIT OR Apache-2.0
//! Blueprint confidence scoring: the scaffold gate.
//!
//! Four dimensions in `[0, 1]`, combined as
//! `0.3·completeness + 0.3·feasibility + 0.2·edge + 0.2·efficiency`.
//! A composite below the gate threshold sends the blueprint back for
//! regeneration before the implement stage runs.

use agf_policy::ExecutionPolicy;
use agf_sandbox::{collect_imports, has_forbidden_import};
use serde::{Deserialize, Serialize};

/// Default gate threshold.
pub const DEFAULT_GATE_THRESHOLD: f64 = 0.6;

/// Version tag recorded on attempt records for score comparability.
pub const SCORER_VERSION: &str = "blueprint-scorer/1";

// Composite weights.
const W_COMPLETENESS: f64 = 0.3;
const W_FEASIBILITY: f64 = 0.3;
const W_EDGE: f64 = 0.2;
const W_EFFICIENCY: f64 = 0.2;

// Completeness weights per required file.
const W_ADAPTER: f64 = 0.5;
const W_MANIFEST: f64 = 0.3;
const W_TESTS: f64 = 0.2;

// Efficiency budget: within these bounds a blueprint scores 1.0.
const FILE_BUDGET: usize = 10;
const BYTE_BUDGET: usize = 100 * 1024;

/// Per-dimension scores plus the weighted composite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlueprintScore {
    /// Required files present, weighted.
    pub completeness: f64,
    /// Imports satisfiable under the policy; zero on any forbidden import.
    pub feasibility: f64,
    /// Error classification, exception handling, timeouts, null guards.
    pub edge_handling: f64,
    /// File count and size within budget.
    pub efficiency: f64,
    /// Weighted composite.
    pub composite: f64,
}

impl BlueprintScore {
    /// Whether the composite clears `threshold`.
    #[must_use]
    pub fn passes(&self, threshold: f64) -> bool {
        self.composite >= threshold
    }
}

/// Score a blueprint given its `(path, content)` files and target policy.
#[must_use]
pub fn score_blueprint(files: &[(String, String)], policy: &ExecutionPolicy) -> BlueprintScore {
    let completeness = completeness(files);
    let feasibility = feasibility(files, policy);
    let edge_handling = edge_handling(files);
    let efficiency = efficiency(files);
    let composite = W_COMPLETENESS * completeness
        + W_FEASIBILITY * feasibility
        + W_EDGE * edge_handling
        + W_EFFICIENCY * efficiency;
    BlueprintScore {
        completeness,
        feasibility,
        edge_handling,
        efficiency,
        composite,
    }
}

fn has_file(files: &[(String, String)], suffix: &str) -> bool {
    files.iter().any(|(path, _)| path.ends_with(suffix))
}

fn completeness(files: &[(String, String)]) -> f64 {
    let mut score = 0.0;
    if has_file(files, "adapter.py") {
        score += W_ADAPTER;
    }
    if has_file(files, "manifest.json") {
        score += W_MANIFEST;
    }
    if has_file(files, "test_adapter.py") {
        score += W_TESTS;
    }
    score
}

/// Fraction of import targets the policy allows. Imports of the blueprint's
/// own files are exempt; any forbidden import zeroes the dimension
/// regardless of the rest.
fn feasibility(files: &[(String, String)], policy: &ExecutionPolicy) -> f64 {
    let locals: std::collections::BTreeSet<&str> = files
        .iter()
        .filter_map(|(path, _)| path.strip_suffix(".py"))
        .filter_map(|stem| stem.rsplit('/').next())
        .collect();

    let mut total = 0usize;
    let mut allowed = 0usize;
    for (path, content) in files {
        if !path.ends_with(".py") {
            continue;
        }
        if has_forbidden_import(content) {
            return 0.0;
        }
        for target in collect_imports(content) {
            let root = target.module.split('.').next().unwrap_or(&target.module);
            if locals.contains(root) {
                continue;
            }
            total += 1;
            if policy.imports.decide(&target.module).allowed {
                allowed += 1;
            }
        }
    }
    if total == 0 {
        1.0
    } else {
        allowed as f64 / total as f64
    }
}

/// Presence counting over edge-handling markers in Python sources.
fn edge_handling(files: &[(String, String)]) -> f64 {
    let python: String = files
        .iter()
        .filter(|(path, _)| path.ends_with(".py"))
        .map(|(_, content)| content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let markers: [bool; 4] = [
        python.contains("except "),
        python.contains("raise "),
        python.contains("timeout"),
        python.contains("is None") || python.contains("is not None"),
    ];
    markers.iter().filter(|m| **m).count() as f64 / markers.len() as f64
}

fn efficiency(files: &[(String, String)]) -> f64 {
    let count = files.len();
    let bytes: usize = files.iter().map(|(_, c)| c.len()).sum();
    let count_score = if count <= FILE_BUDGET {
        1.0
    } else {
        (FILE_BUDGET as f64 / count as f64).clamp(0.0, 1.0)
    };
    let byte_score = if bytes <= BYTE_BUDGET {
        1.0
    } else {
        (BYTE_BUDGET as f64 / bytes as f64).clamp(0.0, 1.0)
    };
    (count_score + byte_score) / 2.0
}
