// SPDX-License-Identifier: MIT OR Apache-2.0
//! Arbitration: the `llm` node's decision maker.
//!
//! The arbitration prompt carries the message history, the tool catalog,
//! the remaining hop budget, the router recommendation, and any pending
//! agent-to-agent messages. The agent *decides*; the router only *informs*.

use crate::state::{AgentToAgentMessage, Message, PendingToolCall};
use crate::tools::ToolDescriptor;
use agf_cancel::CancellationToken;
use agf_gateway::{Gateway, GatewayError, GenerateRequest, Purpose};
use agf_registry::RoutingDecision;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

/// What the agent decided to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentDecision {
    /// Dispatch these tool calls, then return to arbitration.
    CallTools {
        /// The calls, in emission order.
        calls: Vec<PendingToolCall>,
    },
    /// Answer the user and finish.
    Respond {
        /// Final answer text.
        message: String,
    },
    /// Synthesize a new capability module for this intent.
    BuildModule {
        /// Build intent, normalized from the conversation.
        intent: String,
    },
    /// No capability fits; ask the user instead of guessing.
    Clarify {
        /// Clarifying question.
        question: String,
    },
}

/// Everything the arbitration prompt is built from.
#[derive(Debug, Clone)]
pub struct ArbitrationContext {
    /// Message history.
    pub messages: Vec<Message>,
    /// Registered tool catalog.
    pub tool_catalog: Vec<ToolDescriptor>,
    /// Remaining hop budget.
    pub remaining_hops: u32,
    /// Router recommendation, when the route node produced one.
    pub recommendation: Option<RoutingDecision>,
    /// Pending agent-to-agent messages.
    pub a2a_messages: Vec<AgentToAgentMessage>,
}

/// Errors from arbitration.
#[derive(Debug, thiserror::Error)]
pub enum ArbiterError {
    /// The gateway call failed.
    #[error("arbitration call failed: {0}")]
    Gateway(#[from] GatewayError),
    /// The decision payload did not match the contract.
    #[error("arbitration decision invalid: {detail}")]
    InvalidDecision {
        /// What was wrong.
        detail: String,
    },
}

/// The `llm` node's decision maker.
#[async_trait]
pub trait Arbiter: Send + Sync {
    /// Decide the next action for `ctx`.
    async fn decide(
        &self,
        ctx: &ArbitrationContext,
        cancel: &CancellationToken,
    ) -> Result<AgentDecision, ArbiterError>;
}

// ---------------------------------------------------------------------------
// GatewayArbiter
// ---------------------------------------------------------------------------

/// Production arbiter: prompts the CHAT lane for a structured decision.
pub struct GatewayArbiter {
    gateway: Arc<Gateway>,
    org_id: String,
}

impl GatewayArbiter {
    /// An arbiter calling through `gateway` on behalf of `org_id`.
    #[must_use]
    pub fn new(gateway: Arc<Gateway>, org_id: impl Into<String>) -> Self {
        Self {
            gateway,
            org_id: org_id.into(),
        }
    }

    fn compose(ctx: &ArbitrationContext) -> String {
        let mut out = String::from(
            "You are the arbitration agent of a capability platform. Decide the \
             next action: call tools, respond, build a new module, or ask a \
             clarifying question. Use the router recommendation as advice, not \
             as an order.\n\n## History\n",
        );
        for message in &ctx.messages {
            out.push_str(&format!("[{:?}] {}\n", message.role, message.content));
        }
        out.push_str("\n## Tools\n");
        for tool in &ctx.tool_catalog {
            out.push_str(&format!(
                "- {} ({:?}): {}\n",
                tool.name, tool.circuit_state, tool.arg_schema
            ));
        }
        out.push_str(&format!("\nremaining_hops: {}\n", ctx.remaining_hops));
        if let Some(recommendation) = &ctx.recommendation {
            out.push_str("\n## Router recommendation\n");
            for candidate in &recommendation.candidates {
                out.push_str(&format!(
                    "- {} composite={:.3}\n",
                    candidate.module_id, candidate.composite_score
                ));
            }
        }
        if !ctx.a2a_messages.is_empty() {
            out.push_str("\n## Agent messages\n");
            for message in &ctx.a2a_messages {
                out.push_str(&format!(
                    "- {} -> {}: {}\n",
                    message.sender_role, message.recipient_role, message.payload
                ));
            }
        }
        out.push_str("\nRespond with a single JSON object matching the decision schema.\n");
        out
    }
}

/// JSON Schema for the arbitration decision payload.
#[must_use]
pub fn decision_schema() -> serde_json::Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://agent-forge.dev/schemas/agent-decision/v1",
        "type": "object",
        "required": ["action"],
        "properties": {
            "action": { "enum": ["call_tools", "respond", "build_module", "clarify"] },
            "calls": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["tool_name", "args"],
                    "properties": {
                        "tool_name": { "type": "string" },
                        "args": {}
                    }
                }
            },
            "message": { "type": "string" },
            "intent": { "type": "string" },
            "question": { "type": "string" }
        }
    })
}

#[async_trait]
impl Arbiter for GatewayArbiter {
    async fn decide(
        &self,
        ctx: &ArbitrationContext,
        cancel: &CancellationToken,
    ) -> Result<AgentDecision, ArbiterError> {
        let request = GenerateRequest {
            prompt: Self::compose(ctx),
            system: None,
            job_id: "arbitration".to_string(),
            org_id: self.org_id.clone(),
            correlation_id: uuid::Uuid::new_v4(),
        };
        let schema = decision_schema();
        let response = self
            .gateway
            .generate(Purpose::Chat, &request, Some(&schema), cancel)
            .await?;
        let payload = response
            .payload
            .ok_or_else(|| ArbiterError::InvalidDecision {
                detail: "no structured payload".to_string(),
            })?;
        serde_json::from_value(payload).map_err(|e| ArbiterError::InvalidDecision {
            detail: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedArbiter
// ---------------------------------------------------------------------------

/// Test arbiter that replays a scripted decision sequence.
#[derive(Default)]
pub struct ScriptedArbiter {
    decisions: Mutex<VecDeque<AgentDecision>>,
}

impl ScriptedArbiter {
    /// An arbiter replaying `decisions` in order. Once exhausted it responds
    /// with a fixed completion message.
    #[must_use]
    pub fn new(decisions: Vec<AgentDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
        }
    }
}

#[async_trait]
impl Arbiter for ScriptedArbiter {
    async fn decide(
        &self,
        _ctx: &ArbitrationContext,
        _cancel: &CancellationToken,
    ) -> Result<AgentDecision, ArbiterError> {
        let next = self
            .decisions
            .lock()
            .expect("script lock poisoned")
            .pop_front();
        Ok(next.unwrap_or(AgentDecision::Respond {
            message: "done".to_string(),
        }))
    }
}
