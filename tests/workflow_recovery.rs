// SPDX-License-Identifier: MIT OR Apache-2.0
//! Crash recovery: killing the orchestrator between a tool execution and its
//! successor checkpoint must leave the user-visible conversation identical
//! to an uninterrupted run.

use agf_cancel::CancellationToken;
use agf_core::AdapterRunResult;
use agf_orchestrator::{
    AgentDecision, CheckpointJournal, FileJournal, Orchestrator, PendingToolCall, ScriptedArbiter,
    ToolHandler, ToolRegistry, TurnRequest,
};
use agf_registry::ModuleRegistry;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

struct LookupTool {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl ToolHandler for LookupTool {
    fn name(&self) -> &str {
        "lookup"
    }

    fn arg_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }

    async fn invoke(&self, args: serde_json::Value) -> AdapterRunResult {
        // Idempotent: same args, same result, every time.
        self.calls.fetch_add(1, Ordering::SeqCst);
        AdapterRunResult::succeeded(Uuid::nil(), json!({"result": args}))
    }
}

fn orchestrator(
    journal_dir: &Path,
    decisions: Vec<AgentDecision>,
    calls: Arc<AtomicU32>,
) -> Orchestrator {
    let mut tools = ToolRegistry::new();
    tools.register(LookupTool { calls });
    Orchestrator::new(
        Arc::new(FileJournal::new(journal_dir)),
        tools,
        Arc::new(ScriptedArbiter::new(decisions)),
        Arc::new(ModuleRegistry::new()),
    )
}

fn turn(message: &str) -> TurnRequest {
    TurnRequest {
        conversation_id: None,
        org_id: "org-1".to_string(),
        correlation_id: Uuid::nil(),
        user_message: message.to_string(),
        constraints: BTreeMap::new(),
    }
}

fn call_lookup() -> AgentDecision {
    AgentDecision::CallTools {
        calls: vec![PendingToolCall {
            tool_name: "lookup".to_string(),
            args: json!({"q": "commute"}),
        }],
    }
}

fn respond() -> AgentDecision {
    AgentDecision::Respond {
        message: "your commute is 24 minutes".to_string(),
    }
}

#[tokio::test]
async fn resume_replays_from_latest_checkpoint() {
    // Reference: an uninterrupted run.
    let reference_dir = tempfile::tempdir().unwrap();
    let reference_calls = Arc::new(AtomicU32::new(0));
    let reference = orchestrator(
        reference_dir.path(),
        vec![call_lookup(), respond()],
        reference_calls.clone(),
    );
    let reference_outcome = reference
        .run_turn(&turn("what is my commute today?"), &CancellationToken::new())
        .await
        .unwrap();
    let reference_state = FileJournal::new(reference_dir.path())
        .latest(&reference_outcome.conversation_id)
        .unwrap()
        .unwrap()
        .state;

    // Crashing run: identical inputs, but the process dies right after the
    // tool executed — the Tool checkpoint never flushed. Simulate the kill
    // by truncating the journal to the Llm checkpoint (sequence 3).
    let crash_dir = tempfile::tempdir().unwrap();
    let crash_calls = Arc::new(AtomicU32::new(0));
    let first_process = orchestrator(
        crash_dir.path(),
        vec![call_lookup(), respond()],
        crash_calls.clone(),
    );
    let crashed_outcome = first_process
        .run_turn(&turn("what is my commute today?"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(crash_calls.load(Ordering::SeqCst), 1);

    let journal_file = std::fs::read_dir(crash_dir.path())
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .find(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
        .unwrap();
    let full = std::fs::read_to_string(&journal_file).unwrap();
    let truncated: String = full.lines().take(3).map(|l| format!("{l}\n")).collect();
    std::fs::write(&journal_file, truncated).unwrap();

    // Restart: the tool invocation replays (idempotent), arbitration
    // continues, the conversation completes.
    let second_process = orchestrator(crash_dir.path(), vec![respond()], crash_calls.clone());
    let outcomes = second_process
        .resume_all(&turn(""), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(crash_calls.load(Ordering::SeqCst), 2, "tool replayed once");

    // The user-visible conversation state matches the uninterrupted run.
    let recovered_state = FileJournal::new(crash_dir.path())
        .latest(&crashed_outcome.conversation_id)
        .unwrap()
        .unwrap()
        .state;

    let visible = |state: &agf_orchestrator::ConversationState| {
        state
            .messages
            .iter()
            .map(|m| (m.role, m.content.clone(), m.hop_index))
            .collect::<Vec<_>>()
    };
    assert_eq!(visible(&recovered_state), visible(&reference_state));
    assert_eq!(recovered_state.remaining_hops, reference_state.remaining_hops);
    assert!(recovered_state.completed);
    assert_eq!(
        outcomes[0].final_message,
        reference_outcome.final_message
    );
}

#[tokio::test]
async fn terminated_conversations_are_not_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let first = orchestrator(dir.path(), vec![respond()], calls.clone());
    first
        .run_turn(&turn("hello"), &CancellationToken::new())
        .await
        .unwrap();

    let second = orchestrator(dir.path(), vec![], calls);
    let outcomes = second
        .resume_all(&turn(""), &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcomes.is_empty(), "completed conversations stay finished");
}
