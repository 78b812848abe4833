// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end validator flows over real module directories.
//!
//! The runtime phase is driven with shell commands that fabricate the junit
//! artifact, so the flows run without a Python toolchain.

use agf_cancel::CancellationToken;
use agf_policy::ExecutionPolicy;
use agf_validate::{FixHintCategory, ModuleValidator, ValidationStatus, ValidatorOptions};
use std::path::Path;

const GOOD_ADAPTER: &str = r#"import json
import requests


def describe():
    return {"capabilities": ["rest_api"]}


def run(args):
    return {"ok": True, "args": args}
"#;

const GOOD_MANIFEST: &str = r#"{
  "module_id": "weather/openmeteo",
  "version": "1.0.0",
  "capabilities": ["rest_api"],
  "required_credentials": [],
  "resources": {"memory_mb": 64},
  "status": "pending",
  "org_id": "org-1"
}
"#;

const GOOD_TEST: &str = "from adapter import run\n\n\ndef test_run():\n    assert run({})[\"ok\"]\n";

fn write_module(dir: &Path, adapter: &str, manifest: &str, test: &str) {
    std::fs::write(dir.join("adapter.py"), adapter).unwrap();
    std::fs::write(dir.join("manifest.json"), manifest).unwrap();
    std::fs::write(dir.join("test_adapter.py"), test).unwrap();
}

fn passing_junit_command() -> Vec<String> {
    let xml = r#"<testsuite name="pytest" tests="1" failures="0" errors="0" skipped="0" time="0.05"><testcase name="test_run" time="0.01"/></testsuite>"#;
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("printf '%s' '{xml}' > junit.xml"),
    ]
}

fn failing_junit_command() -> Vec<String> {
    let xml = r#"<testsuite name="pytest" tests="2" failures="1" errors="0" skipped="0" time="0.05"><testcase name="test_run" time="0.01"/><testcase name="test_shape"><failure message="AssertionError: expected 3 rows">trace</failure></testcase></testsuite>"#;
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("printf '%s' '{xml}' > junit.xml; exit 1"),
    ]
}

fn validator_with(command: Vec<String>) -> ModuleValidator {
    ModuleValidator::new().with_options(ValidatorOptions {
        test_command: Some(command),
        artifact_globs: vec!["junit.xml".to_string()],
        artifact_dir: None,
    })
}

#[tokio::test]
async fn clean_module_validates() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), GOOD_ADAPTER, GOOD_MANIFEST, GOOD_TEST);

    let report = validator_with(passing_junit_command())
        .validate(
            dir.path(),
            &ExecutionPolicy::module_validation(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.status, ValidationStatus::Validated, "{report:#?}");
    assert!(report.static_results.iter().all(|c| c.passed));
    assert_eq!(report.runtime_results.tests_executed, 1);
    assert_eq!(report.runtime_results.passed, 1);
    assert!(report.fix_hints.is_empty());
    assert!(report.artifacts.iter().any(|a| a.ends_with("junit.xml")));
}

#[tokio::test]
async fn failing_test_produces_test_failure_hint() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), GOOD_ADAPTER, GOOD_MANIFEST, GOOD_TEST);

    let report = validator_with(failing_junit_command())
        .validate(
            dir.path(),
            &ExecutionPolicy::module_validation(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.status, ValidationStatus::Failed);
    assert_eq!(report.runtime_results.failed, 1);
    let hint = report
        .fix_hints
        .iter()
        .find(|h| h.category == FixHintCategory::TestFailure)
        .expect("test failure hint");
    assert_eq!(hint.location, "test_shape");
    assert!(hint.suggestion.contains("expected 3 rows"));
    assert_eq!(report.failing_tests(), vec!["test_shape"]);
}

#[tokio::test]
async fn forbidden_import_fails_statically_with_security_block() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = format!("import subprocess\n{GOOD_ADAPTER}");
    write_module(dir.path(), &adapter, GOOD_MANIFEST, GOOD_TEST);

    let report = validator_with(passing_junit_command())
        .validate(
            dir.path(),
            &ExecutionPolicy::module_validation(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.status, ValidationStatus::Failed);
    // Runtime phase never ran.
    assert_eq!(report.runtime_results.tests_executed, 0);
    assert!(report.has_terminal_hint());
    let hint = report
        .fix_hints
        .iter()
        .find(|h| h.category == FixHintCategory::SecurityBlock)
        .expect("security block hint");
    assert!(hint.location.starts_with("adapter.py:1"));
}

#[tokio::test]
async fn uncategorized_import_is_fixable_violation() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = format!("import torch\n{GOOD_ADAPTER}");
    write_module(dir.path(), &adapter, GOOD_MANIFEST, GOOD_TEST);

    let report = validator_with(passing_junit_command())
        .validate(
            dir.path(),
            &ExecutionPolicy::module_validation(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.status, ValidationStatus::Failed);
    assert!(!report.has_terminal_hint());
    assert!(
        report
            .fix_hints
            .iter()
            .any(|h| h.category == FixHintCategory::ImportViolation)
    );
}

#[tokio::test]
async fn missing_required_file_reports_schema_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("adapter.py"), GOOD_ADAPTER).unwrap();
    std::fs::write(dir.path().join("manifest.json"), GOOD_MANIFEST).unwrap();
    // no test_adapter.py

    let report = validator_with(passing_junit_command())
        .validate(
            dir.path(),
            &ExecutionPolicy::module_validation(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.status, ValidationStatus::Failed);
    let required = report
        .static_results
        .iter()
        .find(|c| c.name == "required_files")
        .unwrap();
    assert!(!required.passed);
    assert!(required.detail.as_deref().unwrap().contains("test_adapter.py"));
}

#[tokio::test]
async fn missing_contract_symbol_reports_missing_method() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = "import json\n\n\ndef run(args):\n    return args\n";
    write_module(dir.path(), adapter, GOOD_MANIFEST, GOOD_TEST);

    let report = validator_with(passing_junit_command())
        .validate(
            dir.path(),
            &ExecutionPolicy::module_validation(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.status, ValidationStatus::Failed);
    let hint = report
        .fix_hints
        .iter()
        .find(|h| h.category == FixHintCategory::MissingMethod)
        .expect("missing method hint");
    assert_eq!(hint.location, "adapter.py::describe");
}

#[tokio::test]
async fn invalid_manifest_reports_every_schema_error() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = r#"{"module_id": "weather", "version": "1.0", "status": "pending", "org_id": "o", "surprise": 1}"#;
    write_module(dir.path(), GOOD_ADAPTER, manifest, GOOD_TEST);

    let report = validator_with(passing_junit_command())
        .validate(
            dir.path(),
            &ExecutionPolicy::module_validation(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.status, ValidationStatus::Failed);
    let schema_hints: Vec<_> = report
        .fix_hints
        .iter()
        .filter(|h| h.category == FixHintCategory::SchemaError)
        .collect();
    assert!(!schema_hints.is_empty());
}

#[tokio::test]
async fn missing_module_dir_is_infrastructure_error() {
    let report = ModuleValidator::new()
        .validate(
            Path::new("/definitely/not/a/module"),
            &ExecutionPolicy::module_validation(),
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(report.status, ValidationStatus::Error);
}

#[tokio::test]
async fn sandbox_fault_is_infrastructure_error() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), GOOD_ADAPTER, GOOD_MANIFEST, GOOD_TEST);

    let report = validator_with(vec!["/no/such/interpreter".to_string()])
        .validate(
            dir.path(),
            &ExecutionPolicy::module_validation(),
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(report.status, ValidationStatus::Error);
    assert!(
        report
            .static_results
            .iter()
            .any(|c| c.name == "sandbox" && !c.passed)
    );
}
