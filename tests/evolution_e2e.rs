// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end evolution pipeline scenarios: happy build, repair-then-success,
//! thrash detection, terminal policy violations, tampered bundles, and
//! job-level idempotence.
//!
//! Model calls are scripted and the sandboxed test run is driven with shell
//! commands that fabricate the junit artifact, so the scenarios run without
//! a network or a Python toolchain.

use agf_cancel::CancellationToken;
use agf_core::bundle_from_dir;
use agf_evolve::{
    AttestedInstall, AuditLine, BuildRequest, BuildStatus, EvolutionPipeline, EvolveConfig,
    Installer, RejectReason,
};
use agf_gateway::{
    Gateway, GatewayPolicy, ModelPreference, Purpose, ScriptedProvider, ok_response,
};
use agf_registry::{ModuleHandle, ModuleRegistry};
use agf_validate::{FixHintCategory, ValidationStatus, ValidatorOptions};
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

const INTENT: &str = "build a weather tracker for provider openmeteo";

fn preference(provider: &str) -> ModelPreference {
    ModelPreference {
        provider: provider.to_string(),
        model: format!("{provider}-large"),
        priority: 80,
        max_tokens: 4096,
        seed: Some(7),
    }
}

fn lanes() -> GatewayPolicy {
    GatewayPolicy::builder()
        .preference(Purpose::Codegen, preference("codegen"))
        .preference(Purpose::Repair, preference("repairer"))
        .build()
}

/// A generator response whose files implement the weather adapter.
fn implement_response(adapter_body: &str) -> String {
    json!({
        "stage": "implement",
        "module_id": "weather/openmeteo",
        "changed_files": [
            { "path": "weather_openmeteo/adapter.py", "content": adapter_body }
        ],
        "assumptions": ["open-meteo needs no credentials"],
        "rationale": "fill the adapter body",
        "policy_profile": "module_validation"
    })
    .to_string()
}

fn good_adapter() -> String {
    [
        "import json",
        "import requests",
        "",
        "",
        "def describe():",
        "    return {\"module_id\": \"weather/openmeteo\", \"capabilities\": [\"rest_api\"]}",
        "",
        "",
        "def run(args):",
        "    if args is None:",
        "        raise ValueError(\"args must be a mapping\")",
        "    response = requests.get(args[\"url\"], timeout=5)",
        "    return {\"ok\": True, \"data\": response.json()}",
        "",
    ]
    .join("\n")
}

fn passing_junit() -> Vec<String> {
    let xml = r#"<testsuite name="pytest" tests="3" failures="0" errors="0" skipped="0" time="0.1"><testcase name="test_describe_reports_identity"/><testcase name="test_run_rejects_none"/><testcase name="test_run_echoes_args"/></testsuite>"#;
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("printf '%s' '{xml}' > junit.xml"),
    ]
}

fn failing_junit() -> Vec<String> {
    let xml = r#"<testsuite name="pytest" tests="3" failures="1" errors="0" skipped="0" time="0.1"><testcase name="test_describe_reports_identity"/><testcase name="test_run_rejects_none"/><testcase name="test_run_echoes_args"><failure message="AssertionError: expected ok">trace</failure></testcase></testsuite>"#;
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("printf '%s' '{xml}' > junit.xml; exit 1"),
    ]
}

/// Fails on the first run (before `flag` exists), passes afterwards.
fn fail_once_junit(flag: &Path) -> Vec<String> {
    let fail_xml = r#"<testsuite tests="1" failures="1" errors="0" time="0.1"><testcase name="test_run_echoes_args"><failure message="AssertionError: expected ok">t</failure></testcase></testsuite>"#;
    let pass_xml = r#"<testsuite tests="1" failures="0" errors="0" time="0.1"><testcase name="test_run_echoes_args"/></testsuite>"#;
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "if [ -f {flag} ]; then printf '%s' '{pass_xml}' > junit.xml; else touch {flag}; printf '%s' '{fail_xml}' > junit.xml; exit 1; fi",
            flag = flag.display()
        ),
    ]
}

struct NullHandle;

#[async_trait]
impl ModuleHandle for NullHandle {
    fn kind(&self) -> &str {
        "python_adapter"
    }

    async fn invoke(&self, args: serde_json::Value) -> agf_core::AdapterRunResult {
        agf_core::AdapterRunResult::succeeded(uuid::Uuid::nil(), args)
    }
}

fn pipeline_with(
    work_root: &Path,
    codegen_script: Vec<Result<agf_gateway::ProviderResponse, agf_gateway::ProviderError>>,
    repair_script: Vec<Result<agf_gateway::ProviderResponse, agf_gateway::ProviderError>>,
    test_command: Vec<String>,
    registry: Arc<ModuleRegistry>,
) -> EvolutionPipeline {
    let mut gateway = Gateway::new(lanes());
    gateway.register_provider(ScriptedProvider::new("codegen", codegen_script));
    gateway.register_provider(ScriptedProvider::new("repairer", repair_script));

    let validator = agf_validate::ModuleValidator::new().with_options(ValidatorOptions {
        test_command: Some(test_command),
        artifact_globs: vec!["junit.xml".to_string()],
        artifact_dir: None,
    });

    EvolutionPipeline::new(Arc::new(gateway), work_root)
        .with_validator(validator)
        .with_registry(registry, Arc::new(|_dir, _manifest| Arc::new(NullHandle)))
}

fn request() -> BuildRequest {
    BuildRequest::builder(INTENT).org_id("org-1").build()
}

#[tokio::test]
async fn happy_build_installs_and_registers() {
    let work = tempfile::tempdir().unwrap();
    let registry = Arc::new(ModuleRegistry::new());
    let pipeline = pipeline_with(
        work.path(),
        vec![Ok(ok_response(&implement_response(&good_adapter())))],
        vec![],
        passing_junit(),
        registry.clone(),
    );

    let outcome = pipeline.run_build(&request(), &CancellationToken::new()).await;

    assert_eq!(outcome.status, BuildStatus::Installed, "{outcome:#?}");
    assert_eq!(outcome.module_id, "weather/openmeteo");
    assert_eq!(outcome.version.as_deref(), Some("1.0.0"));
    assert_eq!(outcome.attempt_count, 1);
    assert_eq!(outcome.repair_count, 0);

    // Audit log: exactly one VALIDATED attempt plus the install line.
    let attempts = pipeline.audit().attempts(&outcome.job_id).unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].validation_report.status, ValidationStatus::Validated);
    let lines = pipeline.audit().read_all(&outcome.job_id).unwrap();
    assert!(lines.iter().any(|l| matches!(l, AuditLine::Install { .. })));

    // Registry exposes the active module.
    let snapshot = registry.snapshot("org-1");
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].module_id, "weather/openmeteo");
    assert_eq!(snapshot.entries[0].version, "1.0.0");

    // The installed tree carries the generated adapter.
    let pointer = pipeline.installer().active_pointer("weather/openmeteo").unwrap();
    assert_eq!(pointer["version"], "1.0.0");
}

#[tokio::test]
async fn repair_then_success() {
    let work = tempfile::tempdir().unwrap();
    let flags = tempfile::tempdir().unwrap();
    let registry = Arc::new(ModuleRegistry::new());

    let pipeline = pipeline_with(
        work.path(),
        vec![Ok(ok_response(&implement_response(&good_adapter())))],
        // The repair response rewrites the adapter (content differs so the
        // fingerprint comparison sees a fresh bundle).
        vec![Ok(ok_response(&implement_response(&format!(
            "{}\n# repaired\n",
            good_adapter()
        ))))],
        fail_once_junit(&flags.path().join("ran_once")),
        registry.clone(),
    );

    let outcome = pipeline.run_build(&request(), &CancellationToken::new()).await;

    assert_eq!(outcome.status, BuildStatus::Installed, "{outcome:#?}");
    assert_eq!(outcome.repair_count, 1);
    assert_eq!(outcome.attempt_count, 2);

    let attempts = pipeline.audit().attempts(&outcome.job_id).unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].validation_report.status, ValidationStatus::Failed);
    assert!(
        attempts[0]
            .validation_report
            .fix_hints
            .iter()
            .any(|h| h.category == FixHintCategory::TestFailure),
        "first attempt must carry a test_failure hint"
    );
    assert_eq!(attempts[1].validation_report.status, ValidationStatus::Validated);
}

#[tokio::test]
async fn identical_fingerprints_stop_with_thrashing() {
    let work = tempfile::tempdir().unwrap();
    let registry = Arc::new(ModuleRegistry::new());

    let pipeline = pipeline_with(
        work.path(),
        vec![Ok(ok_response(&implement_response(&good_adapter())))],
        // The "repair" reproduces the same failing test every time.
        vec![
            Ok(ok_response(&implement_response(&format!("{}\n# try 2\n", good_adapter())))),
            Ok(ok_response(&implement_response(&format!("{}\n# try 3\n", good_adapter())))),
        ],
        failing_junit(),
        registry.clone(),
    );

    let outcome = pipeline.run_build(&request(), &CancellationToken::new()).await;

    assert_eq!(outcome.status, BuildStatus::Thrashing, "{outcome:#?}");
    let attempts = pipeline.audit().attempts(&outcome.job_id).unwrap();
    assert_eq!(attempts.len(), 2, "loop exits at the second identical fingerprint");
    assert_eq!(attempts[0].failure_fingerprint, attempts[1].failure_fingerprint);

    // No install happened.
    assert!(pipeline.installer().active_pointer("weather/openmeteo").is_none());
    assert!(registry.snapshot("org-1").entries.is_empty());

    let lines = pipeline.audit().read_all(&outcome.job_id).unwrap();
    assert!(lines.iter().any(|l| matches!(
        l,
        AuditLine::Closed {
            reason: agf_evolve::TerminalReason::Thrashing,
            ..
        }
    )));
}

#[tokio::test]
async fn forbidden_import_is_terminal() {
    let work = tempfile::tempdir().unwrap();
    let registry = Arc::new(ModuleRegistry::new());

    let bad_adapter = format!("import subprocess\n{}", good_adapter());
    let repair_provider = ScriptedProvider::always("repairer", "should never be called");
    let repair_calls_probe = Arc::new(repair_provider);

    let mut gateway = Gateway::new(lanes());
    gateway.register_provider(ScriptedProvider::new(
        "codegen",
        vec![Ok(ok_response(&implement_response(&bad_adapter)))],
    ));
    // Register through the Arc so the call count stays observable.
    struct SharedProvider(Arc<ScriptedProvider>);
    #[async_trait]
    impl agf_gateway::ProviderClient for SharedProvider {
        fn id(&self) -> &str {
            self.0.id()
        }
        async fn generate(
            &self,
            request: &agf_gateway::ProviderRequest,
        ) -> Result<agf_gateway::ProviderResponse, agf_gateway::ProviderError> {
            self.0.generate(request).await
        }
    }
    gateway.register_provider(SharedProvider(repair_calls_probe.clone()));

    let validator = agf_validate::ModuleValidator::new().with_options(ValidatorOptions {
        test_command: Some(passing_junit()),
        artifact_globs: vec!["junit.xml".to_string()],
        artifact_dir: None,
    });
    let pipeline = EvolutionPipeline::new(Arc::new(gateway), work.path())
        .with_validator(validator)
        .with_registry(registry.clone(), Arc::new(|_d, _m| Arc::new(NullHandle)));

    let outcome = pipeline.run_build(&request(), &CancellationToken::new()).await;

    assert_eq!(outcome.status, BuildStatus::Terminal, "{outcome:#?}");
    let attempts = pipeline.audit().attempts(&outcome.job_id).unwrap();
    assert_eq!(attempts.len(), 1, "no further attempts after a terminal category");
    assert!(
        attempts[0]
            .validation_report
            .fix_hints
            .iter()
            .any(|h| h.category.is_terminal())
    );
    assert_eq!(repair_calls_probe.call_count(), 0, "repair lane never invoked");

    let lines = pipeline.audit().read_all(&outcome.job_id).unwrap();
    assert!(lines.iter().any(|l| matches!(
        l,
        AuditLine::Closed {
            reason: agf_evolve::TerminalReason::Terminal,
            ..
        }
    )));
}

#[tokio::test]
async fn tampered_bundle_rejected_at_install() {
    let modules = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    std::fs::write(
        staging.path().join("manifest.json"),
        r#"{"module_id": "weather/openmeteo", "version": "1.0.0", "status": "pending", "org_id": "org-1"}"#,
    )
    .unwrap();
    std::fs::write(staging.path().join("adapter.py"), "def run(a):\n    return a\n").unwrap();

    let attestation = AttestedInstall {
        module_id: "weather/openmeteo".to_string(),
        bundle_sha256: bundle_from_dir(staging.path()).unwrap().bundle_sha256,
        status: ValidationStatus::Validated,
        validated_at: chrono::Utc::now(),
    };

    // Mutate a file on disk after attestation.
    std::fs::write(staging.path().join("adapter.py"), "def run(a):\n    return None\n").unwrap();

    let installer = Installer::new(modules.path());
    let err = installer
        .install(Some(&attestation), staging.path())
        .unwrap_err();
    assert!(matches!(
        err,
        agf_evolve::InstallError::Rejected {
            reason: RejectReason::HashMismatch,
            ..
        }
    ));

    let log = std::fs::read_to_string(installer.rejection_log()).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert!(log.contains("HASH_MISMATCH"));
    assert!(installer.active_pointer("weather/openmeteo").is_none());
}

#[tokio::test]
async fn identical_requests_share_a_job_and_audit_log() {
    let work = tempfile::tempdir().unwrap();
    let registry = Arc::new(ModuleRegistry::new());

    let run = |script: Vec<_>| {
        pipeline_with(
            work.path(),
            script,
            vec![],
            passing_junit(),
            registry.clone(),
        )
    };

    let first = run(vec![Ok(ok_response(&implement_response(&good_adapter())))])
        .run_build(&request(), &CancellationToken::new())
        .await;
    let second = run(vec![Ok(ok_response(&implement_response(&good_adapter())))])
        .run_build(&request(), &CancellationToken::new())
        .await;

    assert_eq!(first.job_id, second.job_id);
    assert_eq!(second.status, BuildStatus::Installed);

    // Both runs appended to the same log; no second file exists.
    let audit_dir = work.path().join("audit");
    let files: Vec<_> = std::fs::read_dir(&audit_dir).unwrap().flatten().collect();
    assert_eq!(files.len(), 1);
    let pipeline = run(vec![]);
    let attempts = pipeline.audit().attempts(&first.job_id).unwrap();
    assert_eq!(attempts.len(), 2, "reruns merge into one audit log");
}

#[tokio::test]
async fn zero_repair_attempts_means_no_repair() {
    let work = tempfile::tempdir().unwrap();
    let registry = Arc::new(ModuleRegistry::new());

    let pipeline = pipeline_with(
        work.path(),
        vec![Ok(ok_response(&implement_response(&good_adapter())))],
        vec![Ok(ok_response(&implement_response("never used")))],
        failing_junit(),
        registry,
    )
    .with_config(EvolveConfig {
        max_repair_attempts: 0,
        ..EvolveConfig::default()
    });

    let outcome = pipeline.run_build(&request(), &CancellationToken::new()).await;
    assert_eq!(outcome.status, BuildStatus::AttemptsExhausted);
    assert_eq!(outcome.repair_count, 0);
    assert_eq!(outcome.attempt_count, 1);
}

#[tokio::test]
async fn repair_count_never_exceeds_the_budget() {
    let work = tempfile::tempdir().unwrap();
    let registry = Arc::new(ModuleRegistry::new());

    // Every repair changes the file, and the failing test alternates between
    // two names so consecutive fingerprints differ and thrash detection
    // never fires. The toggle lives in the work root because the scratch
    // dir is fresh per run.
    let counter = work.path().join("counter");
    let alternating = {
        let a = r#"<testsuite tests="1" failures="1" errors="0" time="0"><testcase name="test_a"><failure message="x">t</failure></testcase></testsuite>"#;
        let b = r#"<testsuite tests="1" failures="1" errors="0" time="0"><testcase name="test_b"><failure message="x">t</failure></testcase></testsuite>"#;
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "if [ -f {c} ]; then rm {c}; printf '%s' '{a}' > junit.xml; else touch {c}; printf '%s' '{b}' > junit.xml; fi; exit 1",
                c = counter.display()
            ),
        ]
    };

    let repairs: Vec<_> = (0..8)
        .map(|i| Ok(ok_response(&implement_response(&format!("{}\n# rev {i}\n", good_adapter())))))
        .collect();

    let pipeline = pipeline_with(
        work.path(),
        vec![Ok(ok_response(&implement_response(&good_adapter())))],
        repairs,
        alternating,
        registry,
    )
    .with_config(EvolveConfig {
        max_repair_attempts: 3,
        ..EvolveConfig::default()
    });

    let outcome = pipeline.run_build(&request(), &CancellationToken::new()).await;
    assert_eq!(outcome.status, BuildStatus::AttemptsExhausted);
    assert_eq!(outcome.repair_count, 3);
    assert_eq!(outcome.attempt_count, 4);
    let attempts = pipeline.audit().attempts(&outcome.job_id).unwrap();
    assert_eq!(attempts.len(), 4);
}
