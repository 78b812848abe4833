// SPDX-License-Identifier: MIT OR Apache-2.0
//! agf-orchestrator
//!
//! The bounded, resumable, checkpointed workflow state machine at the top of
//! Agent Forge: it arbitrates intent, consults the capability router,
//! dispatches tools through circuit breakers, invokes the self-evolution
//! pipeline for `build_module` intents, and checkpoints after every node so
//! a crashed process resumes exactly where it stopped.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Arbitration (the `llm` node).
pub mod arbiter;
/// Workflow event bus.
pub mod bus;
/// Durable checkpoint journal.
pub mod checkpoint;
/// Conversation state.
pub mod state;
/// Tool registration and dispatch.
pub mod tools;
/// The orchestrator.
pub mod workflow;

pub use arbiter::{
    AgentDecision, ArbitrationContext, Arbiter, ArbiterError, GatewayArbiter, ScriptedArbiter,
    decision_schema,
};
pub use bus::{EventBus, EventBusStats, EventSubscription, WorkflowEvent};
pub use checkpoint::{Checkpoint, CheckpointJournal, FileJournal, JournalError, MemoryJournal};
pub use state::{
    AgentToAgentMessage, ConversationState, Message, MessageRole, PendingToolCall, StateError,
    WorkflowNode,
};
pub use tools::{ToolDescriptor, ToolHandler, ToolRegistry};
pub use workflow::{
    Orchestrator, OrchestratorConfig, TurnOutcome, TurnRequest, TurnStatus, WorkflowError,
};
