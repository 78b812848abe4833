// SPDX-License-Identifier: MIT OR Apache-2.0
//! Conversation state: the append-only record a workflow run mutates.
//!
//! Every mutation appends (messages are never edited in place), and
//! `remaining_hops` strictly decreases across node transitions. When it
//! reaches zero the state is terminal and the orchestrator is forced into
//! synthesis.

use agf_registry::RoutingDecision;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The human user.
    User,
    /// The arbitrating agent.
    Agent,
    /// A tool result.
    Tool,
    /// An agent-to-agent message.
    A2a,
}

/// One entry in the conversation's message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Message {
    /// Author role.
    pub role: MessageRole,
    /// Message content.
    pub content: String,
    /// Attachment references (artifact paths or hashes).
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Hop counter value when the message was appended.
    pub hop_index: u32,
}

/// A specialized message kind exchanged between agent roles.
///
/// Persisted inside the conversation state, so delivery survives crash
/// recovery; the recipient's next arbitration sees it in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentToAgentMessage {
    /// Sending role name.
    pub sender_role: String,
    /// Receiving role name.
    pub recipient_role: String,
    /// Arbitrary payload.
    pub payload: serde_json::Value,
    /// Hop counter value at enqueue time.
    pub hop_index: u32,
    /// End-to-end correlation id.
    pub correlation_id: Uuid,
}

/// A tool call the agent has requested but the orchestrator has not yet run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PendingToolCall {
    /// Registered tool name.
    pub tool_name: String,
    /// JSON arguments.
    pub args: serde_json::Value,
}

/// Nodes of the workflow state graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowNode {
    /// Ingest the user message.
    Intent,
    /// Consult the capability router.
    Route,
    /// Arbitrate the next action.
    Llm,
    /// Dispatch pending tool calls.
    Tool,
    /// Validate a built module.
    Validate,
    /// Synthesize the final answer.
    Synth,
    /// Terminal.
    End,
}

/// Errors from conversation-state mutations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    /// The hop budget is already exhausted.
    #[error("hop budget exhausted for conversation '{conversation_id}'")]
    HopsExhausted {
        /// Conversation whose budget ran out.
        conversation_id: String,
    },
}

/// Per-run conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConversationState {
    /// Stable conversation identifier.
    pub conversation_id: String,
    /// Owning tenant.
    pub org_id: String,
    /// End-to-end correlation id.
    pub correlation_id: Uuid,
    /// Ordered message log (append-only).
    pub messages: Vec<Message>,
    /// Pending agent-to-agent messages.
    #[serde(default)]
    pub a2a_messages: Vec<AgentToAgentMessage>,
    /// Hops remaining; strictly decreases, never negative.
    pub remaining_hops: u32,
    /// Maximum llm⇄tool loop iterations.
    pub max_cycles: u32,
    /// Tool calls awaiting dispatch.
    #[serde(default)]
    pub pending_tool_calls: Vec<PendingToolCall>,
    /// Build intent awaiting the validate node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_build_intent: Option<String>,
    /// Final message awaiting the synth node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_final_message: Option<String>,
    /// Last node that completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_node: Option<WorkflowNode>,
    /// Router recommendation from the route node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_recommendation: Option<RoutingDecision>,
    /// Set on explicit completion.
    pub completed: bool,
}

impl ConversationState {
    /// A fresh conversation with the given hop budget.
    #[must_use]
    pub fn new(
        conversation_id: impl Into<String>,
        org_id: impl Into<String>,
        hop_budget: u32,
        max_cycles: u32,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            org_id: org_id.into(),
            correlation_id: Uuid::new_v4(),
            messages: Vec::new(),
            a2a_messages: Vec::new(),
            remaining_hops: hop_budget,
            max_cycles,
            pending_tool_calls: Vec::new(),
            pending_build_intent: None,
            pending_final_message: None,
            last_node: None,
            router_recommendation: None,
            completed: false,
        }
    }

    /// Append a message at the current hop index.
    pub fn append_message(&mut self, role: MessageRole, content: impl Into<String>) {
        self.messages.push(Message {
            role,
            content: content.into(),
            attachments: Vec::new(),
            hop_index: self.remaining_hops,
        });
    }

    /// Append a message carrying attachments.
    pub fn append_message_with_attachments(
        &mut self,
        role: MessageRole,
        content: impl Into<String>,
        attachments: Vec<String>,
    ) {
        self.messages.push(Message {
            role,
            content: content.into(),
            attachments,
            hop_index: self.remaining_hops,
        });
    }

    /// Enqueue an agent-to-agent message.
    pub fn push_a2a(&mut self, message: AgentToAgentMessage) {
        self.a2a_messages.push(message);
    }

    /// Consume one hop.
    ///
    /// # Errors
    ///
    /// [`StateError::HopsExhausted`] when the budget is already zero; the
    /// counter never goes negative.
    pub fn consume_hop(&mut self) -> Result<u32, StateError> {
        if self.remaining_hops == 0 {
            return Err(StateError::HopsExhausted {
                conversation_id: self.conversation_id.clone(),
            });
        }
        self.remaining_hops -= 1;
        Ok(self.remaining_hops)
    }

    /// `true` once the hop budget is spent or completion was recorded.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.completed || self.remaining_hops == 0
    }

    /// Mark explicit completion.
    pub fn complete(&mut self) {
        self.completed = true;
        self.last_node = Some(WorkflowNode::End);
    }
}
