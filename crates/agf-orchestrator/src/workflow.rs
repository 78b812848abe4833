// SPDX-License-Identifier: MIT OR Apache-2.0
//! The workflow orchestrator: a bounded, resumable, checkpointed state
//! machine.
//!
//! Nodes run strictly serialized per conversation; after each node completes,
//! and before its result is externally observable, the full state is
//! checkpointed. Cycles are permitted only between `llm` and `tool`, bounded
//! by `max_cycles`; an exhausted hop budget forces synthesis. Crash recovery
//! reloads the highest-sequence checkpoint and re-enters at the next node,
//! replaying idempotent effects where their checkpoint never flushed.

use crate::arbiter::{AgentDecision, ArbitrationContext, Arbiter};
use crate::bus::{EventBus, WorkflowEvent};
use crate::checkpoint::{CheckpointJournal, JournalError};
use crate::state::{ConversationState, MessageRole, PendingToolCall, WorkflowNode};
use crate::tools::ToolRegistry;
use agf_cancel::CancellationToken;
use agf_evolve::{BuildRequest, BuildStatus, EvolutionPipeline};
use agf_registry::{ModuleRegistry, RouteQuery, RouterWeights, recommend};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hop budget for new conversations.
    pub hop_budget_default: u32,
    /// Maximum llm⇄tool loop iterations.
    pub max_cycles: u32,
    /// Soft per-node deadline.
    pub node_deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            hop_budget_default: 5,
            max_cycles: 2,
            node_deadline: Duration::from_secs(60),
        }
    }
}

impl From<&agf_config::ForgeConfig> for OrchestratorConfig {
    fn from(config: &agf_config::ForgeConfig) -> Self {
        Self {
            hop_budget_default: config.hop_budget_default,
            ..Self::default()
        }
    }
}

/// A single inbound turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Existing conversation to continue, or `None` to start one.
    pub conversation_id: Option<String>,
    /// Owning tenant.
    pub org_id: String,
    /// End-to-end correlation id.
    pub correlation_id: Uuid,
    /// The user's message.
    pub user_message: String,
    /// Build constraints forwarded to the pipeline.
    pub constraints: BTreeMap<String, String>,
}

/// How the turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// A final answer was synthesized.
    Completed,
    /// The agent asked a clarifying question instead of guessing.
    Clarification,
    /// The hop budget forced synthesis.
    HopsExhausted,
}

/// The user-visible result of a turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Conversation the turn ran in.
    pub conversation_id: String,
    /// Final (or clarifying) message.
    pub final_message: String,
    /// Artifact references accumulated across tool calls.
    pub artifacts: Vec<String>,
    /// Completion status.
    pub status: TurnStatus,
}

/// Orchestrator failures that cannot be reported as turn outcomes.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A checkpoint write failed; the node result is not observable.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// The turn was cancelled.
    #[error("turn cancelled")]
    Cancelled,
}

impl WorkflowError {
    /// The stable [`ErrorCode`](agf_error::ErrorCode) for this error.
    #[must_use]
    pub fn error_code(&self) -> agf_error::ErrorCode {
        match self {
            Self::Journal(_) => agf_error::ErrorCode::CheckpointWriteFailed,
            Self::Cancelled => agf_error::ErrorCode::Timeout,
        }
    }
}

/// The workflow orchestrator.
pub struct Orchestrator {
    journal: Arc<dyn CheckpointJournal>,
    tools: ToolRegistry,
    arbiter: Arc<dyn Arbiter>,
    registry: Arc<ModuleRegistry>,
    pipeline: Option<Arc<EvolutionPipeline>>,
    bus: EventBus,
    metrics: agf_telemetry::MetricsCollector,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(
        journal: Arc<dyn CheckpointJournal>,
        tools: ToolRegistry,
        arbiter: Arc<dyn Arbiter>,
        registry: Arc<ModuleRegistry>,
    ) -> Self {
        Self {
            journal,
            tools,
            arbiter,
            registry,
            pipeline: None,
            bus: EventBus::new(),
            metrics: agf_telemetry::MetricsCollector::new(),
            config: OrchestratorConfig::default(),
        }
    }

    /// Attach the self-evolution pipeline for `build_module` intents.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: Arc<EvolutionPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// The event bus for external observers.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The per-turn metrics collector.
    #[must_use]
    pub fn metrics(&self) -> &agf_telemetry::MetricsCollector {
        &self.metrics
    }

    /// Run one turn to completion.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::Journal`] when a checkpoint cannot be made durable
    /// (the node's result is then not observable), or
    /// [`WorkflowError::Cancelled`].
    pub async fn run_turn(
        &self,
        request: &TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, WorkflowError> {
        let mut state = match &request.conversation_id {
            Some(id) => match self.journal.latest(id)? {
                Some(checkpoint) if !checkpoint.state.is_terminal() => checkpoint.state,
                _ => self.fresh_state(Some(id.clone()), request),
            },
            None => self.fresh_state(None, request),
        };

        state.append_message(MessageRole::User, request.user_message.clone());
        self.complete_node(&mut state, WorkflowNode::Intent)?;

        self.drive(state, request, cancel).await
    }

    /// Resume every unterminated conversation after a crash.
    ///
    /// Each conversation reloads its highest-sequence checkpoint and
    /// re-enters the workflow at the next node. Durable effects replay
    /// idempotently.
    ///
    /// # Errors
    ///
    /// Propagates journal scan failures; per-conversation failures are
    /// logged and skipped.
    pub async fn resume_all(
        &self,
        request_defaults: &TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<TurnOutcome>, WorkflowError> {
        let mut outcomes = Vec::new();
        for conversation_id in self.journal.unterminated()? {
            let Some(checkpoint) = self.journal.latest(&conversation_id)? else {
                continue;
            };
            info!(
                target: "forge.workflow",
                conversation = %conversation_id,
                sequence = checkpoint.sequence,
                node = ?checkpoint.state.last_node,
                "resuming after restart"
            );
            match self.drive(checkpoint.state, request_defaults, cancel).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(
                    target: "forge.workflow",
                    conversation = %conversation_id,
                    error = %e,
                    "resume failed"
                ),
            }
        }
        Ok(outcomes)
    }

    fn fresh_state(&self, id: Option<String>, request: &TurnRequest) -> ConversationState {
        let conversation_id = id.unwrap_or_else(|| format!("conv-{}", Uuid::new_v4()));
        let mut state = ConversationState::new(
            conversation_id,
            request.org_id.clone(),
            self.config.hop_budget_default,
            self.config.max_cycles,
        );
        state.correlation_id = request.correlation_id;
        state
    }

    /// Execute nodes until `End`, checkpointing after each.
    async fn drive(
        &self,
        mut state: ConversationState,
        request: &TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, WorkflowError> {
        let mut status = TurnStatus::Completed;
        let mut cycles_this_turn = 0u32;
        let mut node = next_node(&state);
        let turn_start = std::time::Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            // An exhausted hop budget forces synthesis.
            if state.remaining_hops == 0
                && !matches!(node, WorkflowNode::Synth | WorkflowNode::End)
            {
                debug!(
                    target: "forge.workflow",
                    conversation = %state.conversation_id,
                    "hop budget exhausted; forcing synthesis"
                );
                status = TurnStatus::HopsExhausted;
                state.pending_tool_calls.clear();
                if state.pending_final_message.is_none() {
                    state.pending_final_message =
                        Some("I ran out of reasoning budget; here is what I have so far.".to_string());
                }
                node = WorkflowNode::Synth;
            }

            match node {
                WorkflowNode::Intent => {
                    // Ingestion happened in run_turn; nothing to redo on resume.
                    node = WorkflowNode::Route;
                }
                WorkflowNode::Route => {
                    let snapshot = self.registry.snapshot(&state.org_id);
                    let query = RouteQuery {
                        text: last_user_message(&state),
                        required_capabilities: Vec::new(),
                    };
                    state.router_recommendation =
                        Some(recommend(&query, &snapshot, RouterWeights::default()));
                    state.consume_hop_or_zero();
                    self.complete_node(&mut state, WorkflowNode::Route)?;
                    node = WorkflowNode::Llm;
                }
                WorkflowNode::Llm => {
                    node = self
                        .run_llm_node(&mut state, &mut status, &mut cycles_this_turn, cancel)
                        .await?;
                }
                WorkflowNode::Tool => {
                    self.run_tool_node(&mut state, cancel).await?;
                    node = WorkflowNode::Llm;
                }
                WorkflowNode::Validate => {
                    self.run_validate_node(&mut state, request, cancel).await?;
                    node = WorkflowNode::Synth;
                }
                WorkflowNode::Synth => {
                    let message = state
                        .pending_final_message
                        .take()
                        .unwrap_or_else(|| "done".to_string());
                    state.append_message(MessageRole::Agent, message);
                    self.complete_node(&mut state, WorkflowNode::Synth)?;
                    node = WorkflowNode::End;
                }
                WorkflowNode::End => {
                    state.complete();
                    let sequence = self.complete_node(&mut state, WorkflowNode::End)?;
                    self.bus.publish(WorkflowEvent::TurnCompleted {
                        conversation_id: state.conversation_id.clone(),
                    });
                    self.metrics.record(agf_telemetry::RunMetrics {
                        conversation_id: state.conversation_id.clone(),
                        nodes_executed: sequence,
                        duration_ms: turn_start.elapsed().as_millis() as u64,
                        tool_calls: state
                            .messages
                            .iter()
                            .filter(|m| m.role == MessageRole::Tool)
                            .count() as u64,
                        // Token counters live in the gateway's attempt
                        // records; the turn summary only tracks shape.
                        provider_calls: 0,
                        tokens_in: 0,
                        tokens_out: 0,
                        errors_count: 0,
                    });
                    let final_message = state
                        .messages
                        .iter()
                        .rev()
                        .find(|m| m.role == MessageRole::Agent)
                        .map_or_else(String::new, |m| m.content.clone());
                    let artifacts = state
                        .messages
                        .iter()
                        .flat_map(|m| m.attachments.iter().cloned())
                        .collect();
                    return Ok(TurnOutcome {
                        conversation_id: state.conversation_id,
                        final_message,
                        artifacts,
                        status,
                    });
                }
            }
        }
    }

    async fn run_llm_node(
        &self,
        state: &mut ConversationState,
        status: &mut TurnStatus,
        cycles_this_turn: &mut u32,
        cancel: &CancellationToken,
    ) -> Result<WorkflowNode, WorkflowError> {
        let ctx = ArbitrationContext {
            messages: state.messages.clone(),
            tool_catalog: self.tools.catalog(),
            remaining_hops: state.remaining_hops,
            recommendation: state.router_recommendation.clone(),
            a2a_messages: state.a2a_messages.clone(),
        };

        let node_token = CancellationToken::new();
        let decision = tokio::select! {
            result = self.arbiter.decide(&ctx, &node_token) => match result {
                Ok(decision) => Some(decision),
                Err(e) => {
                    state.append_message(
                        MessageRole::Agent,
                        format!("arbitration failed: {e}"),
                    );
                    None
                }
            },
            () = tokio::time::sleep(self.config.node_deadline) => {
                node_token.cancel();
                state.append_message(
                    MessageRole::Agent,
                    "arbitration exceeded its deadline; synthesizing from what is known",
                );
                None
            }
            () = cancel.cancelled() => {
                node_token.cancel();
                return Err(WorkflowError::Cancelled);
            }
        };

        let next = match decision {
            None => {
                state.pending_final_message = Some(
                    "I hit an internal problem while deciding the next step; please retry."
                        .to_string(),
                );
                WorkflowNode::Synth
            }
            Some(AgentDecision::Respond { message }) => {
                state.pending_final_message = Some(message);
                WorkflowNode::Synth
            }
            Some(AgentDecision::Clarify { question }) => {
                *status = TurnStatus::Clarification;
                state.pending_final_message = Some(question);
                WorkflowNode::Synth
            }
            Some(AgentDecision::BuildModule { intent }) => {
                state.pending_build_intent = Some(intent);
                WorkflowNode::Validate
            }
            Some(AgentDecision::CallTools { calls }) => {
                if *cycles_this_turn >= state.max_cycles {
                    state.append_message(
                        MessageRole::Agent,
                        "tool loop budget exhausted; synthesizing with available results",
                    );
                    state.pending_final_message = Some(
                        "I reached my tool budget; answering with the results gathered so far."
                            .to_string(),
                    );
                    WorkflowNode::Synth
                } else {
                    *cycles_this_turn += 1;
                    state.pending_tool_calls = calls;
                    WorkflowNode::Tool
                }
            }
        };

        state.consume_hop_or_zero();
        self.complete_node(state, WorkflowNode::Llm)?;
        Ok(next)
    }

    async fn run_tool_node(
        &self,
        state: &mut ConversationState,
        cancel: &CancellationToken,
    ) -> Result<(), WorkflowError> {
        let calls: Vec<PendingToolCall> = std::mem::take(&mut state.pending_tool_calls);
        for call in calls {
            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            // (a) circuit-breaker check.
            if let Some(breaker) = self.tools.breaker(&call.tool_name)
                && !breaker.allow_request()
            {
                state.append_message(
                    MessageRole::Tool,
                    format!(
                        "tool '{}' is unavailable (circuit open); pick another tool or answer without it",
                        call.tool_name
                    ),
                );
                continue;
            }

            let Some(handler) = self.tools.handler(&call.tool_name) else {
                state.append_message(
                    MessageRole::Tool,
                    format!("tool '{}' is not registered", call.tool_name),
                );
                continue;
            };

            // (b) execute under the node deadline.
            let result = tokio::select! {
                r = handler.invoke(call.args.clone()) => Some(r),
                () = tokio::time::sleep(self.config.node_deadline) => None,
                () = cancel.cancelled() => return Err(WorkflowError::Cancelled),
            };

            // (c) record the result with hop index and breaker feedback.
            match result {
                Some(envelope) => {
                    let success = envelope.is_success();
                    if let Some(breaker) = self.tools.breaker(&call.tool_name) {
                        if success {
                            breaker.record_success();
                        } else {
                            breaker.record_failure();
                        }
                    }
                    let attachments: Vec<String> = envelope
                        .artifacts
                        .iter()
                        .map(|a| a.path.clone())
                        .collect();
                    let content = serde_json::to_string(&envelope.data)
                        .unwrap_or_else(|_| "<unserializable tool result>".to_string());
                    state.append_message_with_attachments(
                        MessageRole::Tool,
                        format!("{}: {}", call.tool_name, content),
                        attachments,
                    );
                    self.bus.publish(WorkflowEvent::ToolDispatched {
                        conversation_id: state.conversation_id.clone(),
                        tool_name: call.tool_name.clone(),
                        success,
                    });
                }
                None => {
                    if let Some(breaker) = self.tools.breaker(&call.tool_name) {
                        breaker.record_failure();
                    }
                    state.append_message(
                        MessageRole::Tool,
                        format!("tool '{}' timed out", call.tool_name),
                    );
                }
            }
        }

        state.consume_hop_or_zero();
        self.complete_node(state, WorkflowNode::Tool)?;
        Ok(())
    }

    async fn run_validate_node(
        &self,
        state: &mut ConversationState,
        request: &TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<(), WorkflowError> {
        let intent = state
            .pending_build_intent
            .take()
            .unwrap_or_else(|| last_user_message(state));

        let message = match &self.pipeline {
            None => "module synthesis is not enabled on this deployment".to_string(),
            Some(pipeline) => {
                let mut builder = BuildRequest::builder(intent)
                    .org_id(state.org_id.clone())
                    .correlation_id(state.correlation_id);
                for (key, value) in &request.constraints {
                    builder = builder.constraint(key.clone(), value.clone());
                }
                let build_request = builder.build();
                let outcome = pipeline.run_build(&build_request, cancel).await;
                self.bus.publish(WorkflowEvent::BuildFinished {
                    conversation_id: state.conversation_id.clone(),
                    job_id: outcome.job_id.clone(),
                    status: format!("{:?}", outcome.status),
                });
                match outcome.status {
                    BuildStatus::Installed => format!(
                        "Built and installed {} v{} (bundle {}).",
                        outcome.module_id,
                        outcome.version.as_deref().unwrap_or("?"),
                        outcome
                            .bundle_sha256
                            .as_deref()
                            .map(|s| &s[..12.min(s.len())])
                            .unwrap_or("?")
                    ),
                    _ => {
                        // The final user-visible message reflects the actual
                        // status; never a fake success.
                        let fingerprint = outcome
                            .last_fingerprint
                            .as_deref()
                            .map(|f| &f[..12.min(f.len())])
                            .unwrap_or("n/a");
                        format!(
                            "Module build did not complete (status {:?}, last fingerprint {}). {}",
                            outcome.status,
                            fingerprint,
                            outcome.diagnosis.as_deref().unwrap_or("no diagnosis available")
                        )
                    }
                }
            }
        };

        state.pending_final_message = Some(message);
        state.consume_hop_or_zero();
        self.complete_node(state, WorkflowNode::Validate)?;
        Ok(())
    }

    /// Checkpoint `state` for the completed `node` and publish the event.
    ///
    /// The checkpoint is durable before this returns, before the node's
    /// result becomes externally observable.
    fn complete_node(
        &self,
        state: &mut ConversationState,
        node: WorkflowNode,
    ) -> Result<u64, WorkflowError> {
        state.last_node = Some(node);
        let sequence = self.journal.append(state)?;
        self.bus.publish(WorkflowEvent::NodeCompleted {
            conversation_id: state.conversation_id.clone(),
            node,
            sequence,
            remaining_hops: state.remaining_hops,
        });
        Ok(sequence)
    }
}

/// The node to execute next, as a pure function of the checkpointed state.
fn next_node(state: &ConversationState) -> WorkflowNode {
    match state.last_node {
        None => WorkflowNode::Intent,
        Some(WorkflowNode::Intent) => WorkflowNode::Route,
        Some(WorkflowNode::Route) => WorkflowNode::Llm,
        Some(WorkflowNode::Llm) => {
            if !state.pending_tool_calls.is_empty() {
                WorkflowNode::Tool
            } else if state.pending_build_intent.is_some() {
                WorkflowNode::Validate
            } else if state.pending_final_message.is_some() {
                WorkflowNode::Synth
            } else {
                WorkflowNode::Llm
            }
        }
        Some(WorkflowNode::Tool) => WorkflowNode::Llm,
        Some(WorkflowNode::Validate) => WorkflowNode::Synth,
        Some(WorkflowNode::Synth | WorkflowNode::End) => WorkflowNode::End,
    }
}

fn last_user_message(state: &ConversationState) -> String {
    state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map_or_else(String::new, |m| m.content.clone())
}

impl ConversationState {
    /// Consume a hop, saturating at zero (the forced-synthesis check at the
    /// top of the drive loop handles exhaustion).
    pub(crate) fn consume_hop_or_zero(&mut self) {
        let _ = self.consume_hop();
    }
}
