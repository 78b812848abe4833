// SPDX-License-Identifier: MIT OR Apache-2.0
//! The gateway: lane walk, retry, schema enforcement, budget, observability.

use crate::budget::{BudgetLedger, BudgetStore, BudgetVerdict};
use crate::provider::{ProviderClient, ProviderRequest, Usage};
use crate::retry::{RetryAbort, RetryConfig, call_with_retry};
use crate::{GatewayPolicy, ModelPreference, Purpose};
use agf_cancel::CancellationToken;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome class of one preference attempt, for the trail and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The preference produced a validated response.
    Succeeded,
    /// Permanent provider error (auth, bad request).
    Permanent,
    /// Transient errors exhausted the retry budget.
    Exhausted,
    /// The response failed structured-output validation.
    SchemaInvalid,
    /// The provider is not registered.
    UnknownProvider,
}

/// One line of the ordered attempt trail.
///
/// Emitted per preference attempt as both a tracing event and a record the
/// caller can persist; carries what §observability requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptTrail {
    /// Lane of the call.
    pub purpose: Purpose,
    /// Provider id.
    pub provider: String,
    /// Model name.
    pub model: String,
    /// Preference priority.
    pub priority: u32,
    /// What happened.
    pub outcome: AttemptOutcome,
    /// Zero-indexed position in the preference walk.
    pub attempt_index: u32,
    /// Wall time spent on this preference (all retries included).
    pub latency_ms: u64,
    /// Tokens consumed (zero unless the call succeeded).
    pub tokens: u64,
    /// Last error class when the attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
}

/// A validated gateway response.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// Raw response text.
    pub text: String,
    /// Parsed payload when an output contract was declared.
    pub payload: Option<serde_json::Value>,
    /// Preference that produced the response.
    pub provider: String,
    /// Model that produced the response.
    pub model: String,
    /// Token usage for the successful call.
    pub usage: Usage,
    /// The full attempt trail (failed preferences included).
    pub attempts: Vec<AttemptTrail>,
}

impl GatewayError {
    /// The stable [`ErrorCode`](agf_error::ErrorCode) for this error.
    #[must_use]
    pub fn error_code(&self) -> agf_error::ErrorCode {
        match self {
            Self::BudgetExceeded { .. } => agf_error::ErrorCode::BudgetExceeded,
            Self::AllModelsFailed { .. } => agf_error::ErrorCode::AllModelsFailed,
            Self::EmptyLane { .. } => agf_error::ErrorCode::NoCapabilityFound,
            Self::Cancelled => agf_error::ErrorCode::Timeout,
        }
    }

    /// Convert into a [`ForgeError`](agf_error::ForgeError) with context.
    #[must_use]
    pub fn into_forge_error(self) -> agf_error::ForgeError {
        let code = self.error_code();
        let mut err = agf_error::ForgeError::new(code, self.to_string());
        if let Self::AllModelsFailed { attempts, .. } = &self {
            err = err.with_context("attempts", attempts);
        }
        err
    }
}

/// Gateway failure classes.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The budget pre-check failed; no provider was called.
    #[error("budget exceeded for job '{job_id}': {verdict:?}")]
    BudgetExceeded {
        /// Job whose budget is spent.
        job_id: String,
        /// The failing verdict.
        verdict: BudgetVerdict,
    },

    /// No preference in the lane produced a validated response.
    ///
    /// The ordered trail carries enough for the caller to pause the job.
    #[error("all models failed for {purpose:?} ({} preferences tried)", attempts.len())]
    AllModelsFailed {
        /// Lane that was walked.
        purpose: Purpose,
        /// Ordered attempt trail.
        attempts: Vec<AttemptTrail>,
    },

    /// The lane has no preferences configured.
    #[error("no preferences configured for {purpose:?}")]
    EmptyLane {
        /// The unconfigured lane.
        purpose: Purpose,
    },

    /// The call was cancelled.
    #[error("gateway call cancelled")]
    Cancelled,
}

/// Purpose-routed, schema-validated LLM call layer.
pub struct Gateway {
    policy: GatewayPolicy,
    providers: BTreeMap<String, Arc<dyn ProviderClient>>,
    retry: RetryConfig,
    budget: BudgetLedger,
}

impl Gateway {
    /// Create a gateway over `policy` with default retry and no budget caps.
    #[must_use]
    pub fn new(policy: GatewayPolicy) -> Self {
        Self {
            policy,
            providers: BTreeMap::new(),
            retry: RetryConfig::default(),
            budget: BudgetLedger::unlimited(),
        }
    }

    /// Replace the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the budget ledger.
    #[must_use]
    pub fn with_budget(mut self, budget: BudgetLedger) -> Self {
        self.budget = budget;
        self
    }

    /// Register a provider under its own id, replacing any previous one.
    pub fn register_provider<P: ProviderClient + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.id().to_string(), Arc::new(provider));
    }

    /// Sorted ids of all registered providers.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// The budget ledger (for recording out-of-band usage).
    #[must_use]
    pub fn budget(&self) -> &BudgetLedger {
        &self.budget
    }

    /// Generate a completion on the `purpose` lane.
    ///
    /// Walks the lane's preferences in order. For each: retry transient
    /// failures, fail permanent ones over to the next preference, and, when
    /// `output_contract` is declared, validate the response against it,
    /// treating violations as that preference's failure (no retry).
    ///
    /// # Errors
    ///
    /// [`GatewayError::BudgetExceeded`] before any provider call when the
    /// job budget is spent; [`GatewayError::AllModelsFailed`] with the
    /// ordered attempt trail when every preference fails;
    /// [`GatewayError::Cancelled`] when the token fires.
    pub async fn generate(
        &self,
        purpose: Purpose,
        request: &GenerateRequest,
        output_contract: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<GatewayResponse, GatewayError> {
        let lane = self.policy.lane(purpose);
        if lane.is_empty() {
            return Err(GatewayError::EmptyLane { purpose });
        }

        // Budget pre-check: fail fast before any provider call.
        let max_request_tokens = lane.iter().map(|p| u64::from(p.max_tokens)).min().unwrap_or(0);
        let verdict = self.budget.check(&request.job_id, max_request_tokens);
        if !verdict.is_ok() {
            warn!(
                target: "forge.gateway",
                job_id = %request.job_id,
                ?verdict,
                "budget pre-check failed"
            );
            return Err(GatewayError::BudgetExceeded {
                job_id: request.job_id.clone(),
                verdict,
            });
        }

        let schema_validator = output_contract.map(|schema| {
            jsonschema::validator_for(schema).map_err(|e| e.to_string())
        });

        let mut attempts: Vec<AttemptTrail> = Vec::new();

        for (index, preference) in lane.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            let started = Instant::now();
            let mut trail = AttemptTrail {
                purpose,
                provider: preference.provider.clone(),
                model: preference.model.clone(),
                priority: preference.priority,
                outcome: AttemptOutcome::UnknownProvider,
                attempt_index: index as u32,
                latency_ms: 0,
                tokens: 0,
                error_class: None,
            };

            let Some(provider) = self.providers.get(&preference.provider) else {
                trail.latency_ms = started.elapsed().as_millis() as u64;
                emit(&trail);
                attempts.push(trail);
                continue;
            };

            let provider_request = build_provider_request(request, preference, purpose);
            let result = call_with_retry(&self.retry, cancel, || {
                let provider = Arc::clone(provider);
                let provider_request = provider_request.clone();
                async move { provider.generate(&provider_request).await }
            })
            .await;

            trail.latency_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(outcome) => {
                    // Structured-output enforcement: a schema violation fails
                    // this preference without retrying it.
                    let payload = match &schema_validator {
                        Some(Ok(validator)) => {
                            match serde_json::from_str::<serde_json::Value>(&outcome.response.text)
                            {
                                Ok(value) if validator.is_valid(&value) => Some(value),
                                Ok(_) | Err(_) => {
                                    trail.outcome = AttemptOutcome::SchemaInvalid;
                                    trail.error_class = Some("SCHEMA_INVALID".to_string());
                                    emit(&trail);
                                    attempts.push(trail);
                                    continue;
                                }
                            }
                        }
                        Some(Err(compile_error)) => {
                            // A broken contract fails every preference the
                            // same way; surface it through the trail.
                            trail.outcome = AttemptOutcome::SchemaInvalid;
                            trail.error_class = Some(format!("contract: {compile_error}"));
                            emit(&trail);
                            attempts.push(trail);
                            continue;
                        }
                        None => None,
                    };

                    let usage = outcome.response.usage;
                    self.budget.record(&request.job_id, usage.total());
                    trail.outcome = AttemptOutcome::Succeeded;
                    trail.tokens = usage.total();
                    emit(&trail);
                    attempts.push(trail);

                    return Ok(GatewayResponse {
                        text: outcome.response.text,
                        payload,
                        provider: preference.provider.clone(),
                        model: preference.model.clone(),
                        usage,
                        attempts,
                    });
                }
                Err(RetryAbort::Cancelled) => return Err(GatewayError::Cancelled),
                Err(RetryAbort::Permanent(err)) => {
                    trail.outcome = AttemptOutcome::Permanent;
                    trail.error_class = Some(err.kind.class().to_string());
                    emit(&trail);
                    attempts.push(trail);
                }
                Err(RetryAbort::Exhausted(err)) => {
                    trail.outcome = AttemptOutcome::Exhausted;
                    trail.error_class = Some(err.kind.class().to_string());
                    emit(&trail);
                    attempts.push(trail);
                }
            }
        }

        Err(GatewayError::AllModelsFailed { purpose, attempts })
    }
}

/// Caller-facing request: lane-independent fields only; the model, token
/// cap, and seed come from the selected preference.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Prompt text.
    pub prompt: String,
    /// Optional system prompt.
    pub system: Option<String>,
    /// Build job id (budget key).
    pub job_id: String,
    /// Tenant scope.
    pub org_id: String,
    /// End-to-end correlation id.
    pub correlation_id: uuid::Uuid,
}

fn build_provider_request(
    request: &GenerateRequest,
    preference: &ModelPreference,
    purpose: Purpose,
) -> ProviderRequest {
    ProviderRequest {
        purpose,
        model: preference.model.clone(),
        prompt: request.prompt.clone(),
        system: request.system.clone(),
        max_tokens: preference.max_tokens,
        seed: preference.seed,
        job_id: request.job_id.clone(),
        org_id: request.org_id.clone(),
        correlation_id: request.correlation_id,
    }
}

fn emit(trail: &AttemptTrail) {
    info!(
        target: "forge.gateway",
        purpose = ?trail.purpose,
        provider = %trail.provider,
        model = %trail.model,
        priority = trail.priority,
        outcome = ?trail.outcome,
        attempt_index = trail.attempt_index,
        latency_ms = trail.latency_ms,
        tokens = trail.tokens,
        "gateway attempt"
    );
}
