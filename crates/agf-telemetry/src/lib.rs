// SPDX-License-Identifier: MIT OR Apache-2.0
//! agf-telemetry
//!
//! Structured telemetry for Agent Forge: tracing initialization for the two
//! observability modes, plus a thread-safe metrics collector with percentile
//! summaries.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use agf_config::ObservabilityMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing init
// ---------------------------------------------------------------------------

/// Initialize the global tracing subscriber for `mode`.
///
/// `shipping` installs a lean compact formatter at `info`; `debug` installs
/// a JSON formatter at `debug` (intended for a bounded post-incident
/// window). `RUST_LOG` overrides either default. Safe to call more than
/// once; later calls are no-ops.
pub fn init_telemetry(mode: ObservabilityMode) {
    let default_directive = match mode {
        ObservabilityMode::Shipping => "info",
        ObservabilityMode::Debug => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let result = match mode {
        ObservabilityMode::Shipping => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .try_init(),
        ObservabilityMode::Debug => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init(),
    };
    if result.is_ok() {
        info!(target: "forge.telemetry", mode = ?mode, "telemetry initialized");
    }
}

// ---------------------------------------------------------------------------
// RunMetrics
// ---------------------------------------------------------------------------

/// Metrics captured for a single workflow run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunMetrics {
    /// Conversation this run belonged to.
    pub conversation_id: String,
    /// Number of state-graph nodes executed.
    pub nodes_executed: u64,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Tool invocations dispatched.
    pub tool_calls: u64,
    /// Provider calls issued.
    pub provider_calls: u64,
    /// Inbound token count.
    pub tokens_in: u64,
    /// Outbound token count.
    pub tokens_out: u64,
    /// Errors encountered.
    pub errors_count: u64,
}

// ---------------------------------------------------------------------------
// MetricsSummary
// ---------------------------------------------------------------------------

/// Aggregated statistics across multiple runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MetricsSummary {
    /// Number of runs recorded.
    pub count: usize,
    /// Mean duration in milliseconds.
    pub mean_duration_ms: f64,
    /// Median (p50) duration in milliseconds.
    pub p50_duration_ms: f64,
    /// 99th-percentile duration in milliseconds.
    pub p99_duration_ms: f64,
    /// Total inbound tokens across all runs.
    pub total_tokens_in: u64,
    /// Total outbound tokens across all runs.
    pub total_tokens_out: u64,
    /// Error rate (runs with errors / total runs).
    pub error_rate: f64,
    /// Per-conversation run counts (deterministic ordering).
    pub conversation_counts: BTreeMap<String, usize>,
}

/// Compute a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// Thread-safe collector for run metrics.
///
/// Clone freely; all clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<Vec<RunMetrics>>>,
}

impl MetricsCollector {
    /// Create a new, empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed run's metrics.
    pub fn record(&self, metrics: RunMetrics) {
        let mut data = self.inner.lock().expect("metrics lock poisoned");
        data.push(metrics);
    }

    /// Return all recorded run metrics.
    #[must_use]
    pub fn runs(&self) -> Vec<RunMetrics> {
        self.inner.lock().expect("metrics lock poisoned").clone()
    }

    /// Number of runs recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("metrics lock poisoned").len()
    }

    /// Whether the collector has no recorded runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute an aggregated summary of all recorded runs.
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let data = self.inner.lock().expect("metrics lock poisoned");
        if data.is_empty() {
            return MetricsSummary::default();
        }

        let count = data.len();
        let mut durations: Vec<u64> = data.iter().map(|r| r.duration_ms).collect();
        durations.sort_unstable();

        let total_duration: u64 = durations.iter().sum();
        let erroring = data.iter().filter(|r| r.errors_count > 0).count();

        let mut conversation_counts: BTreeMap<String, usize> = BTreeMap::new();
        for r in data.iter() {
            *conversation_counts
                .entry(r.conversation_id.clone())
                .or_insert(0) += 1;
        }

        MetricsSummary {
            count,
            mean_duration_ms: total_duration as f64 / count as f64,
            p50_duration_ms: percentile(&durations, 50.0),
            p99_duration_ms: percentile(&durations, 99.0),
            total_tokens_in: data.iter().map(|r| r.tokens_in).sum(),
            total_tokens_out: data.iter().map(|r| r.tokens_out).sum(),
            error_rate: erroring as f64 / count as f64,
            conversation_counts,
        }
    }

    /// Clear all recorded metrics.
    pub fn clear(&self) {
        self.inner.lock().expect("metrics lock poisoned").clear();
    }
}

// ---------------------------------------------------------------------------
// Tool-call efficiency
// ---------------------------------------------------------------------------

/// Score how close a turn's tool usage came to the optimal call count.
///
/// `optimal` is the number of calls an oracle would have made, `made` the
/// number actually dispatched. When no calls were needed and none were made
/// the reward is 1.0; needless calls (or missing all needed ones) score 0.
#[must_use]
pub fn tool_call_efficiency(optimal: u64, made: u64) -> f64 {
    match (optimal, made) {
        (0, 0) => 1.0,
        (0, _) | (_, 0) => 0.0,
        (m, n) => m.min(n) as f64 / m.max(n) as f64,
    }
}

// ---------------------------------------------------------------------------
// TelemetryExporter
// ---------------------------------------------------------------------------

/// Trait for exporting collected metrics.
pub trait TelemetryExporter: Send + Sync {
    /// Export the given summary. Returns the serialized output on success.
    fn export(&self, summary: &MetricsSummary) -> Result<String, String>;
}

/// Exports metrics as pretty-printed JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExporter;

impl TelemetryExporter for JsonExporter {
    fn export(&self, summary: &MetricsSummary) -> Result<String, String> {
        serde_json::to_string_pretty(summary).map_err(|e| e.to_string())
    }
}
