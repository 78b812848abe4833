// SPDX-License-Identifier: MIT OR Apache-2.0
//! The canonical run-result envelope returned by every tool handler.
//!
//! The envelope is bit-exact across implementations: any handler in any
//! language must produce identical field names and ordering when serialized
//! canonically (see [`crate::canonical_json`]).

use crate::{CONTRACT_VERSION, sha256_hex};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// High-level status of a handler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run finished and produced its full result.
    Succeeded,
    /// The run produced partial results.
    Partial,
    /// The run failed.
    Failed,
}

/// Timing and identity for a single handler run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunInfo {
    /// Unique run identifier.
    pub id: Uuid,
    /// Timestamp when the run started.
    pub started_at: DateTime<Utc>,
    /// Timestamp when the run finished.
    pub ended_at: DateTime<Utc>,
    /// Run status.
    pub status: RunStatus,
}

/// Reference to an artifact produced during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactDescriptor {
    /// Artifact kind (e.g. `"chart.line"`, `"table"`, `"log"`).
    pub kind: String,
    /// Path relative to the run's artifact directory.
    pub path: String,
    /// Declared MIME type.
    pub mime: String,
    /// Hex-encoded SHA-256 of the artifact content.
    pub sha256: String,
}

/// Normalized metering counters for billing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Metering {
    /// Prompt tokens consumed, when the run involved a model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<u64>,
    /// Completion tokens produced, when the run involved a model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<u64>,
    /// Normalized cost units for this run.
    pub run_units: f64,
}

/// Tracing identifiers propagated through every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TraceContext {
    /// End-to-end correlation id.
    pub correlation_id: Uuid,
    /// Span identifiers in creation order.
    #[serde(default)]
    pub span_ids: Vec<String>,
}

/// A structured error entry inside an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EnvelopeErrorEntry {
    /// Stable error code string.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Canonical result envelope produced by every tool handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AdapterRunResult {
    /// Contract version (always [`CONTRACT_VERSION`] for this crate).
    pub contract_version: String,
    /// Run identity and timing.
    pub run: RunInfo,
    /// Handler-specific payload.
    pub data: serde_json::Value,
    /// Artifacts produced during the run.
    #[serde(default)]
    pub artifacts: Vec<ArtifactDescriptor>,
    /// Errors encountered (empty on success).
    #[serde(default)]
    pub errors: Vec<EnvelopeErrorEntry>,
    /// Billing counters.
    pub metering: Metering,
    /// Tracing identifiers.
    pub trace: TraceContext,
}

impl AdapterRunResult {
    /// Construct a successful envelope around `data`.
    #[must_use]
    pub fn succeeded(correlation_id: Uuid, data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            contract_version: CONTRACT_VERSION.to_string(),
            run: RunInfo {
                id: Uuid::new_v4(),
                started_at: now,
                ended_at: now,
                status: RunStatus::Succeeded,
            },
            data,
            artifacts: Vec::new(),
            errors: Vec::new(),
            metering: Metering::default(),
            trace: TraceContext {
                correlation_id,
                span_ids: Vec::new(),
            },
        }
    }

    /// Construct a failed envelope with one error entry.
    #[must_use]
    pub fn failed(correlation_id: Uuid, code: &str, message: impl Into<String>) -> Self {
        let mut result = Self::succeeded(correlation_id, serde_json::Value::Null);
        result.run.status = RunStatus::Failed;
        result.errors.push(EnvelopeErrorEntry {
            code: code.to_string(),
            message: message.into(),
        });
        result
    }

    /// Returns `true` when the run succeeded and carries no errors.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.run.status == RunStatus::Succeeded && self.errors.is_empty()
    }
}

/// Compute normalized run units: `max(cpu_s, gpu_s) · tier_multiplier + tool_overhead`.
#[must_use]
pub fn run_units(cpu_s: f64, gpu_s: f64, tier_multiplier: f64, tool_overhead: f64) -> f64 {
    cpu_s.max(gpu_s) * tier_multiplier + tool_overhead
}

// ---------------------------------------------------------------------------
// Chart artifact validation
// ---------------------------------------------------------------------------

/// Recognized chart kinds for structured chart artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    /// Point series connected by lines.
    Line,
    /// Categorical bars.
    Bar,
    /// Proportional slices.
    Pie,
}

impl ChartKind {
    /// Parse an artifact `kind` string such as `"chart.line"`.
    #[must_use]
    pub fn from_artifact_kind(kind: &str) -> Option<Self> {
        match kind {
            "chart.line" => Some(Self::Line),
            "chart.bar" => Some(Self::Bar),
            "chart.pie" => Some(Self::Pie),
            _ => None,
        }
    }
}

/// Errors from chart artifact validation.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The declared artifact file does not exist or cannot be read.
    #[error("artifact file missing or unreadable: {path}")]
    ArtifactMissing {
        /// Declared artifact path.
        path: String,
    },
    /// The artifact file exists but is empty.
    #[error("artifact file is empty: {path}")]
    ArtifactEmpty {
        /// Declared artifact path.
        path: String,
    },
    /// The declared MIME type is empty or not a chart payload type.
    #[error("artifact '{path}' declares unsupported mime '{mime}'")]
    UnsupportedMime {
        /// Declared artifact path.
        path: String,
        /// Declared MIME type.
        mime: String,
    },
    /// The artifact kind is not a recognized chart kind.
    #[error("artifact kind '{kind}' is not a recognized chart kind")]
    UnknownChartKind {
        /// Declared artifact kind.
        kind: String,
    },
    /// The chart payload fails the schema for its declared kind.
    #[error("chart payload invalid for kind '{kind}': {detail}")]
    ChartSchemaInvalid {
        /// Declared chart kind.
        kind: String,
        /// What failed.
        detail: String,
    },
    /// The on-disk content hash does not match the declared sha256.
    #[error("artifact '{path}' hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch {
        /// Declared artifact path.
        path: String,
        /// Hash declared in the envelope.
        declared: String,
        /// Hash recomputed from disk.
        computed: String,
    },
}

/// Validate a chart artifact structurally, semantically, and deterministically.
///
/// - *structural*: file exists under `artifact_dir`, non-empty, JSON mime
/// - *semantic*: payload parses and satisfies the schema for its chart kind
/// - *deterministic*: recomputed SHA-256 matches the declared hash
///
/// All three must pass before an envelope may report the artifact as valid.
///
/// # Errors
///
/// Returns the first [`EnvelopeError`] encountered, in structural → semantic
/// → deterministic order.
pub fn validate_chart_artifact(
    artifact_dir: &Path,
    artifact: &ArtifactDescriptor,
) -> Result<(), EnvelopeError> {
    let kind = ChartKind::from_artifact_kind(&artifact.kind).ok_or_else(|| {
        EnvelopeError::UnknownChartKind {
            kind: artifact.kind.clone(),
        }
    })?;

    let path = artifact_dir.join(&artifact.path);
    let bytes = std::fs::read(&path).map_err(|_| EnvelopeError::ArtifactMissing {
        path: artifact.path.clone(),
    })?;
    if bytes.is_empty() {
        return Err(EnvelopeError::ArtifactEmpty {
            path: artifact.path.clone(),
        });
    }
    if artifact.mime != "application/json" {
        return Err(EnvelopeError::UnsupportedMime {
            path: artifact.path.clone(),
            mime: artifact.mime.clone(),
        });
    }

    let payload: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| EnvelopeError::ChartSchemaInvalid {
            kind: artifact.kind.clone(),
            detail: e.to_string(),
        })?;
    check_chart_payload(kind, &payload).map_err(|detail| EnvelopeError::ChartSchemaInvalid {
        kind: artifact.kind.clone(),
        detail,
    })?;

    let computed = sha256_hex(&bytes);
    if computed != artifact.sha256 {
        return Err(EnvelopeError::HashMismatch {
            path: artifact.path.clone(),
            declared: artifact.sha256.clone(),
            computed,
        });
    }
    Ok(())
}

fn check_chart_payload(kind: ChartKind, payload: &serde_json::Value) -> Result<(), String> {
    let obj = payload.as_object().ok_or("payload must be an object")?;
    let series = obj
        .get("series")
        .and_then(|v| v.as_array())
        .ok_or("missing 'series' array")?;
    if series.is_empty() {
        return Err("'series' must be non-empty".to_string());
    }
    for (i, s) in series.iter().enumerate() {
        let s = s.as_object().ok_or(format!("series[{i}] must be an object"))?;
        if !s.get("name").is_some_and(serde_json::Value::is_string) {
            return Err(format!("series[{i}] missing string 'name'"));
        }
        let points = s
            .get("points")
            .and_then(|v| v.as_array())
            .ok_or(format!("series[{i}] missing 'points' array"))?;
        match kind {
            ChartKind::Line => {
                for (j, p) in points.iter().enumerate() {
                    let pair = p.as_array().filter(|a| a.len() == 2);
                    if pair.is_none_or(|a| !a.iter().all(serde_json::Value::is_number)) {
                        return Err(format!("series[{i}].points[{j}] must be [x, y] numbers"));
                    }
                }
            }
            ChartKind::Bar | ChartKind::Pie => {
                for (j, p) in points.iter().enumerate() {
                    let pair = p.as_array().filter(|a| a.len() == 2);
                    let ok = pair.is_some_and(|a| a[0].is_string() && a[1].is_number());
                    if !ok {
                        return Err(format!(
                            "series[{i}].points[{j}] must be [label, value] pairs"
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}
