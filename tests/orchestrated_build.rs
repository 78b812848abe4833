// SPDX-License-Identifier: MIT OR Apache-2.0
//! Full stack: a `build_module` intent arriving at the orchestrator flows
//! through arbitration into the evolution pipeline, and the installed module
//! becomes routable for the next turn.

use agf_cancel::CancellationToken;
use agf_evolve::EvolutionPipeline;
use agf_gateway::{
    Gateway, GatewayPolicy, ModelPreference, Purpose, ScriptedProvider, ok_response,
};
use agf_orchestrator::{
    AgentDecision, MemoryJournal, Orchestrator, ScriptedArbiter, ToolRegistry, TurnRequest,
    TurnStatus, WorkflowEvent,
};
use agf_registry::{ModuleHandle, ModuleRegistry, RouteQuery, RouterWeights, recommend};
use agf_validate::{ModuleValidator, ValidatorOptions};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

struct NullHandle;

#[async_trait]
impl ModuleHandle for NullHandle {
    fn kind(&self) -> &str {
        "python_adapter"
    }

    async fn invoke(&self, args: serde_json::Value) -> agf_core::AdapterRunResult {
        agf_core::AdapterRunResult::succeeded(Uuid::nil(), args)
    }
}

fn implement_response() -> String {
    let adapter = [
        "import json",
        "",
        "",
        "def describe():",
        "    return {\"module_id\": \"weather/openmeteo\", \"capabilities\": [\"rest_api\"]}",
        "",
        "",
        "def run(args):",
        "    if args is None:",
        "        raise ValueError(\"args\")",
        "    return {\"ok\": True}",
        "",
    ]
    .join("\n");
    json!({
        "stage": "implement",
        "module_id": "weather/openmeteo",
        "changed_files": [
            { "path": "weather_openmeteo/adapter.py", "content": adapter }
        ],
        "policy_profile": "module_validation"
    })
    .to_string()
}

fn passing_junit() -> Vec<String> {
    let xml = r#"<testsuite tests="1" failures="0" errors="0" time="0.1"><testcase name="test_run_echoes_args"/></testsuite>"#;
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("printf '%s' '{xml}' > junit.xml"),
    ]
}

#[tokio::test]
async fn build_module_intent_installs_and_becomes_routable() {
    let work = tempfile::tempdir().unwrap();
    let registry = Arc::new(ModuleRegistry::new());

    let mut gateway = Gateway::new(
        GatewayPolicy::builder()
            .preference(
                Purpose::Codegen,
                ModelPreference {
                    provider: "codegen".to_string(),
                    model: "codegen-large".to_string(),
                    priority: 80,
                    max_tokens: 4096,
                    seed: None,
                },
            )
            .build(),
    );
    gateway.register_provider(ScriptedProvider::new(
        "codegen",
        vec![Ok(ok_response(&implement_response()))],
    ));

    let validator = ModuleValidator::new().with_options(ValidatorOptions {
        test_command: Some(passing_junit()),
        artifact_globs: vec!["junit.xml".to_string()],
        artifact_dir: None,
    });
    let pipeline = EvolutionPipeline::new(Arc::new(gateway), work.path())
        .with_validator(validator)
        .with_registry(registry.clone(), Arc::new(|_d, _m| Arc::new(NullHandle)));

    let arbiter = Arc::new(ScriptedArbiter::new(vec![AgentDecision::BuildModule {
        intent: "build a weather tracker for provider openmeteo".to_string(),
    }]));
    let orchestrator = Orchestrator::new(
        Arc::new(MemoryJournal::new()),
        ToolRegistry::new(),
        arbiter,
        registry.clone(),
    )
    .with_pipeline(Arc::new(pipeline));
    let mut sub = orchestrator.bus().subscribe();

    let outcome = orchestrator
        .run_turn(
            &TurnRequest {
                conversation_id: None,
                org_id: "org-1".to_string(),
                correlation_id: Uuid::nil(),
                user_message: "build me a weather tracker".to_string(),
                constraints: BTreeMap::new(),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert!(
        outcome.final_message.contains("Built and installed weather/openmeteo v1.0.0"),
        "unexpected final message: {}",
        outcome.final_message
    );

    // The build event fired with the installed status.
    let mut build_finished = false;
    while let Some(event) = sub.try_recv() {
        if let WorkflowEvent::BuildFinished { status, .. } = event {
            assert_eq!(status, "Installed");
            build_finished = true;
        }
    }
    assert!(build_finished);

    // The freshly installed module is visible to the router for next turns.
    let snapshot = registry.snapshot("org-1");
    let decision = recommend(
        &RouteQuery {
            text: "what is the weather today".to_string(),
            required_capabilities: vec![],
        },
        &snapshot,
        RouterWeights::default(),
    );
    assert_eq!(decision.best().unwrap().module_id, "weather/openmeteo");
}

#[tokio::test]
async fn failed_build_surfaces_an_honest_diagnosis() {
    let work = tempfile::tempdir().unwrap();
    let registry = Arc::new(ModuleRegistry::new());

    let mut gateway = Gateway::new(
        GatewayPolicy::builder()
            .preference(
                Purpose::Codegen,
                ModelPreference {
                    provider: "codegen".to_string(),
                    model: "codegen-large".to_string(),
                    priority: 80,
                    max_tokens: 4096,
                    seed: None,
                },
            )
            .build(),
    );
    // The generated adapter imports a forbidden module.
    let bad = implement_response().replace("import json", "import subprocess");
    gateway.register_provider(ScriptedProvider::new("codegen", vec![Ok(ok_response(&bad))]));

    let validator = ModuleValidator::new().with_options(ValidatorOptions {
        test_command: Some(passing_junit()),
        artifact_globs: vec!["junit.xml".to_string()],
        artifact_dir: None,
    });
    let pipeline = EvolutionPipeline::new(Arc::new(gateway), work.path())
        .with_validator(validator)
        .with_registry(registry.clone(), Arc::new(|_d, _m| Arc::new(NullHandle)));

    let arbiter = Arc::new(ScriptedArbiter::new(vec![AgentDecision::BuildModule {
        intent: "build a weather tracker for provider openmeteo".to_string(),
    }]));
    let orchestrator = Orchestrator::new(
        Arc::new(MemoryJournal::new()),
        ToolRegistry::new(),
        arbiter,
        registry.clone(),
    )
    .with_pipeline(Arc::new(pipeline));

    let outcome = orchestrator
        .run_turn(
            &TurnRequest {
                conversation_id: None,
                org_id: "org-1".to_string(),
                correlation_id: Uuid::nil(),
                user_message: "build me a weather tracker".to_string(),
                constraints: BTreeMap::new(),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    // No fake success: the message names the terminal status and the
    // dominant failure category.
    assert!(outcome.final_message.contains("did not complete"));
    assert!(outcome.final_message.contains("Terminal"));
    assert!(outcome.final_message.contains("security_block"));
    assert!(registry.snapshot("org-1").entries.is_empty());
}
