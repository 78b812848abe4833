// SPDX-License-Identifier: MIT OR Apache-2.0
//! agf-gateway
//!
//! Purpose-routed, schema-validated LLM call layer.
//!
//! Each [`Purpose`] lane holds an ordered list of model preferences; the
//! gateway walks them sequentially (never in parallel), retries transient
//! failures with jittered exponential backoff, enforces structured output
//! against a declared JSON Schema, and fails fast on exhausted budgets
//! before any provider is called. Given the same preference order and the
//! same error sequence, the fallback path is identical.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Per-job token budget accounting.
pub mod budget;
/// The gateway itself.
pub mod gateway;
/// Provider trait, error taxonomy, and the scripted mock.
pub mod provider;
/// Bounded retry with jittered exponential backoff.
pub mod retry;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use budget::{BudgetLedger, BudgetLimits, BudgetStore, BudgetVerdict};
pub use gateway::{
    AttemptOutcome, AttemptTrail, Gateway, GatewayError, GatewayResponse, GenerateRequest,
};
pub use provider::{
    ProviderClient, ProviderError, ProviderErrorKind, ProviderRequest, ProviderResponse,
    ScriptedProvider, Usage, ok_response,
};
pub use retry::{RetryAbort, RetryAttempt, RetryConfig, RetryOutcome, call_with_retry, compute_delay};

/// Routing lane for a gateway call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Purpose {
    /// Module implementation generation.
    Codegen,
    /// Repair-loop fixes driven by validation hints.
    Repair,
    /// Review / scoring passes.
    Critic,
    /// Conversational turns.
    Chat,
}

/// One entry in a purpose lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ModelPreference {
    /// Provider identifier (registry key).
    pub provider: String,
    /// Model name passed to the provider.
    pub model: String,
    /// Priority weight; higher is tried first.
    pub priority: u32,
    /// Per-request completion token cap.
    pub max_tokens: u32,
    /// Seed for providers that support deterministic sampling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Immutable routing policy: one ordered preference list per lane.
///
/// Lists are sorted once at build time (priority descending, then provider
/// and model for stable ties) and never re-ordered afterwards, which is what
/// makes the fallback path deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GatewayPolicy {
    lanes: BTreeMap<Purpose, Vec<ModelPreference>>,
}

impl GatewayPolicy {
    /// Start building a policy.
    #[must_use]
    pub fn builder() -> GatewayPolicyBuilder {
        GatewayPolicyBuilder::default()
    }

    /// The ordered preference list for `purpose` (empty when unconfigured).
    #[must_use]
    pub fn lane(&self, purpose: Purpose) -> &[ModelPreference] {
        self.lanes.get(&purpose).map_or(&[], Vec::as_slice)
    }
}

/// Builder that sorts each lane exactly once.
#[derive(Debug, Default)]
pub struct GatewayPolicyBuilder {
    lanes: BTreeMap<Purpose, Vec<ModelPreference>>,
}

impl GatewayPolicyBuilder {
    /// Add a preference to a lane.
    #[must_use]
    pub fn preference(mut self, purpose: Purpose, preference: ModelPreference) -> Self {
        self.lanes.entry(purpose).or_default().push(preference);
        self
    }

    /// Finish, sorting every lane by priority (descending) with stable
    /// provider/model tie-breaks.
    #[must_use]
    pub fn build(mut self) -> GatewayPolicy {
        for prefs in self.lanes.values_mut() {
            prefs.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.provider.cmp(&b.provider))
                    .then_with(|| a.model.cmp(&b.model))
            });
        }
        GatewayPolicy { lanes: self.lanes }
    }
}
