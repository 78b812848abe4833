// SPDX-License-Identifier: MIT OR Apache-2.0
//! The two-phase module validator.
//!
//! Phase 1 runs static checks without executing anything; phase 2 executes
//! the module's test file inside the sandbox and parses the junit artifact.
//! The merged report carries one fix hint per actionable problem.

use crate::junit::parse_junit;
use crate::report::{
    FixHint, FixHintCategory, HintSeverity, RuntimeResults, StaticCheck, ValidationReport,
    ValidationStatus,
};
use agf_cancel::CancellationToken;
use agf_core::validate_manifest;
use agf_policy::{ExecutionPolicy, is_forbidden_import};
use agf_sandbox::{
    RunRequest, SandboxRunner, ViolationLayer, local_module_names, static_check_with_locals,
};
use chrono::Utc;
use std::path::Path;
use tracing::{debug, info};

/// Files every generated module must contain.
const REQUIRED_FILES: &[&str] = &["adapter.py", "manifest.json", "test_adapter.py"];

/// Contract symbols the adapter must define.
const REQUIRED_SYMBOLS: &[&str] = &["def run(", "def describe("];

/// Options controlling a validation pass.
#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    /// Override for the test command (defaults to pytest with junit output).
    pub test_command: Option<Vec<String>>,
    /// Artifact globs to capture from the run directory.
    pub artifact_globs: Vec<String>,
    /// Where captured artifacts land. Defaults to a `_run_artifacts`
    /// directory beside the module so bundles stay undisturbed.
    pub artifact_dir: Option<std::path::PathBuf>,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            test_command: None,
            artifact_globs: vec!["junit.xml".to_string(), "*.log".to_string()],
            artifact_dir: None,
        }
    }
}

/// Validates module directories against a policy profile.
#[derive(Debug, Clone, Default)]
pub struct ModuleValidator {
    runner: SandboxRunner,
    options: ValidatorOptions,
}

impl ModuleValidator {
    /// A validator with enforcing sandbox and default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the validator options.
    #[must_use]
    pub fn with_options(mut self, options: ValidatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the sandbox runner (e.g. observe-only mode for development).
    #[must_use]
    pub fn with_runner(mut self, runner: SandboxRunner) -> Self {
        self.runner = runner;
        self
    }

    /// The current options.
    #[must_use]
    pub fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    /// Validate the module at `module_dir` under `policy`.
    ///
    /// Never panics and never returns an error: infrastructure problems are
    /// reported as `status = ERROR` inside the report.
    pub async fn validate(
        &self,
        module_dir: &Path,
        policy: &ExecutionPolicy,
        cancel: &CancellationToken,
    ) -> ValidationReport {
        let mut static_results: Vec<StaticCheck> = Vec::new();
        let mut fix_hints: Vec<FixHint> = Vec::new();

        if !module_dir.is_dir() {
            return ValidationReport {
                status: ValidationStatus::Error,
                static_results: vec![StaticCheck {
                    name: "module_dir".to_string(),
                    passed: false,
                    detail: Some(format!("{} is not a directory", module_dir.display())),
                }],
                runtime_results: RuntimeResults::default(),
                fix_hints: Vec::new(),
                artifacts: Vec::new(),
                validated_at: Utc::now(),
            };
        }

        self.check_required_files(module_dir, &mut static_results, &mut fix_hints);
        self.check_contract_symbols(module_dir, &mut static_results, &mut fix_hints);
        self.check_manifest(module_dir, &mut static_results, &mut fix_hints);
        self.check_path_containment(module_dir, &mut static_results, &mut fix_hints);
        self.check_import_policy(module_dir, policy, &mut static_results, &mut fix_hints);

        let statics_passed = static_results.iter().all(|c| c.passed);
        if !statics_passed {
            info!(
                target: "forge.validate",
                module = %module_dir.display(),
                hints = fix_hints.len(),
                "static validation failed; skipping runtime phase"
            );
            return ValidationReport {
                status: ValidationStatus::Failed,
                static_results,
                runtime_results: RuntimeResults::default(),
                fix_hints,
                artifacts: Vec::new(),
                validated_at: Utc::now(),
            };
        }

        // Phase 2: sandboxed test execution.
        let mut request = RunRequest::pytest(module_dir, policy.clone());
        if let Some(ref command) = self.options.test_command {
            request.command = command.clone();
        }
        request.artifact_globs = self.options.artifact_globs.clone();
        if let Some(ref dir) = self.options.artifact_dir {
            request.artifact_dir = dir.clone();
        }

        let execution = self.runner.run(&request, cancel).await;

        if let Some(fault) = execution.sandbox_fault {
            static_results.push(StaticCheck {
                name: "sandbox".to_string(),
                passed: false,
                detail: Some(fault),
            });
            return ValidationReport {
                status: ValidationStatus::Error,
                static_results,
                runtime_results: RuntimeResults::default(),
                fix_hints,
                artifacts: Vec::new(),
                validated_at: Utc::now(),
            };
        }

        // Runtime-layer violations caught by the hook are fixable unless the
        // module is on the forbidden list.
        for violation in &execution.import_violations {
            if violation.layer == ViolationLayer::Runtime {
                fix_hints.push(import_hint(&violation.module, None, &violation.rule));
            }
        }

        let junit = execution
            .artifacts
            .iter()
            .find(|p| p.ends_with("junit.xml"))
            .and_then(|p| std::fs::read_to_string(request.artifact_dir.join(p)).ok())
            .and_then(|xml| parse_junit(&xml));

        let runtime_results = match &junit {
            Some(summary) => RuntimeResults {
                tests_executed: summary.tests,
                passed: summary
                    .tests
                    .saturating_sub(summary.failures + summary.errors + summary.skipped),
                failed: summary.failures,
                errored: summary.errors,
                duration_ms: execution.usage.wall_time_ms,
            },
            None => RuntimeResults {
                duration_ms: execution.usage.wall_time_ms,
                ..RuntimeResults::default()
            },
        };

        if let Some(summary) = &junit {
            for failing in &summary.failing_tests {
                fix_hints.push(FixHint {
                    category: FixHintCategory::TestFailure,
                    location: failing.name.clone(),
                    suggestion: match &failing.message {
                        Some(msg) => format!("make test '{}' pass: {msg}", failing.name),
                        None => format!("make test '{}' pass", failing.name),
                    },
                    severity: HintSeverity::Error,
                });
            }
        } else if !execution.success {
            // No junit artifact at all: crashed before the test framework
            // could write one.
            fix_hints.push(FixHint {
                category: FixHintCategory::TestFailure,
                location: "test_adapter.py".to_string(),
                suggestion: format!(
                    "the test run exited without producing results; stderr: {}",
                    truncate(&execution.stderr, 400)
                ),
                severity: HintSeverity::Error,
            });
        } else {
            // Exit zero but no junit: the command is not running the tests.
            fix_hints.push(FixHint {
                category: FixHintCategory::TestFailure,
                location: "test_adapter.py".to_string(),
                suggestion: "the test run produced no junit artifact; ensure tests execute and write junit.xml".to_string(),
                severity: HintSeverity::Error,
            });
        }

        let all_tests_green = junit
            .as_ref()
            .is_some_and(|s| s.tests > 0 && s.failures == 0 && s.errors == 0);
        let status = if execution.success && all_tests_green && fix_hints.is_empty() {
            ValidationStatus::Validated
        } else {
            ValidationStatus::Failed
        };

        debug!(
            target: "forge.validate",
            module = %module_dir.display(),
            status = ?status,
            tests = runtime_results.tests_executed,
            failed = runtime_results.failed,
            "validation finished"
        );

        ValidationReport {
            status,
            static_results,
            runtime_results,
            fix_hints,
            artifacts: execution.artifacts,
            validated_at: Utc::now(),
        }
    }

    fn check_required_files(
        &self,
        module_dir: &Path,
        results: &mut Vec<StaticCheck>,
        hints: &mut Vec<FixHint>,
    ) {
        let missing: Vec<&str> = REQUIRED_FILES
            .iter()
            .copied()
            .filter(|f| !module_dir.join(f).is_file())
            .collect();
        let passed = missing.is_empty();
        results.push(StaticCheck {
            name: "required_files".to_string(),
            passed,
            detail: (!passed).then(|| format!("missing: {}", missing.join(", "))),
        });
        for file in missing {
            hints.push(FixHint {
                category: FixHintCategory::SchemaError,
                location: file.to_string(),
                suggestion: format!("create the required file '{file}'"),
                severity: HintSeverity::Error,
            });
        }
    }

    fn check_contract_symbols(
        &self,
        module_dir: &Path,
        results: &mut Vec<StaticCheck>,
        hints: &mut Vec<FixHint>,
    ) {
        let adapter = std::fs::read_to_string(module_dir.join("adapter.py")).unwrap_or_default();
        let missing: Vec<&str> = REQUIRED_SYMBOLS
            .iter()
            .copied()
            .filter(|sym| !adapter.contains(sym))
            .collect();
        let passed = missing.is_empty();
        results.push(StaticCheck {
            name: "contract_symbols".to_string(),
            passed,
            detail: (!passed).then(|| format!("missing symbols: {}", missing.join(", "))),
        });
        for sym in missing {
            let name = sym.trim_start_matches("def ").trim_end_matches('(');
            hints.push(FixHint {
                category: FixHintCategory::MissingMethod,
                location: format!("adapter.py::{name}"),
                suggestion: format!("define the required adapter method '{name}'"),
                severity: HintSeverity::Error,
            });
        }
    }

    fn check_manifest(
        &self,
        module_dir: &Path,
        results: &mut Vec<StaticCheck>,
        hints: &mut Vec<FixHint>,
    ) {
        let manifest_path = module_dir.join("manifest.json");
        let outcome = std::fs::read_to_string(&manifest_path)
            .ok()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .map(|doc| validate_manifest(&doc));

        match outcome {
            Some(validation) if validation.ok => {
                results.push(StaticCheck {
                    name: "manifest_schema".to_string(),
                    passed: true,
                    detail: None,
                });
            }
            Some(validation) => {
                results.push(StaticCheck {
                    name: "manifest_schema".to_string(),
                    passed: false,
                    detail: Some(validation.errors.join("; ")),
                });
                for error in validation.errors {
                    hints.push(FixHint {
                        category: FixHintCategory::SchemaError,
                        location: "manifest.json".to_string(),
                        suggestion: format!("fix manifest: {error}"),
                        severity: HintSeverity::Error,
                    });
                }
            }
            None => {
                results.push(StaticCheck {
                    name: "manifest_schema".to_string(),
                    passed: false,
                    detail: Some("manifest.json missing or unparseable".to_string()),
                });
                hints.push(FixHint {
                    category: FixHintCategory::SchemaError,
                    location: "manifest.json".to_string(),
                    suggestion: "write manifest.json as a valid JSON document".to_string(),
                    severity: HintSeverity::Error,
                });
            }
        }
    }

    fn check_path_containment(
        &self,
        module_dir: &Path,
        results: &mut Vec<StaticCheck>,
        hints: &mut Vec<FixHint>,
    ) {
        let mut escapes: Vec<String> = Vec::new();
        for entry in walkdir::WalkDir::new(module_dir).into_iter().flatten() {
            if entry.path_is_symlink() {
                escapes.push(entry.path().display().to_string());
            }
        }
        let passed = escapes.is_empty();
        results.push(StaticCheck {
            name: "path_containment".to_string(),
            passed,
            detail: (!passed).then(|| format!("symlinks escape module root: {}", escapes.join(", "))),
        });
        for path in escapes {
            hints.push(FixHint {
                category: FixHintCategory::PolicyViolation,
                location: path,
                suggestion: "remove the symlink; module files must live under the module root"
                    .to_string(),
                severity: HintSeverity::Error,
            });
        }
    }

    fn check_import_policy(
        &self,
        module_dir: &Path,
        policy: &ExecutionPolicy,
        results: &mut Vec<StaticCheck>,
        hints: &mut Vec<FixHint>,
    ) {
        let locals = local_module_names(module_dir);
        let mut violations = Vec::new();
        for entry in walkdir::WalkDir::new(module_dir).into_iter().flatten() {
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|e| e.to_str()) == Some("py")
                && let Ok(source) = std::fs::read_to_string(entry.path())
            {
                let file = entry
                    .path()
                    .strip_prefix(module_dir)
                    .unwrap_or(entry.path())
                    .display()
                    .to_string();
                for v in static_check_with_locals(&source, policy, &locals) {
                    violations.push((file.clone(), v));
                }
            }
        }
        let passed = violations.is_empty();
        results.push(StaticCheck {
            name: "import_policy".to_string(),
            passed,
            detail: (!passed).then(|| {
                violations
                    .iter()
                    .map(|(f, v)| format!("{f}: {}", v.module))
                    .collect::<Vec<_>>()
                    .join(", ")
            }),
        });
        for (file, violation) in violations {
            let location = match violation.line {
                Some(line) => format!("{file}:{line}"),
                None => file,
            };
            hints.push(import_hint(&violation.module, Some(location), &violation.rule));
        }
    }
}

fn import_hint(module: &str, location: Option<String>, rule: &str) -> FixHint {
    let forbidden = module == "__import__" || is_forbidden_import(module);
    FixHint {
        category: if forbidden {
            FixHintCategory::SecurityBlock
        } else {
            FixHintCategory::ImportViolation
        },
        location: location.unwrap_or_else(|| module.to_string()),
        suggestion: if forbidden {
            format!("remove the forbidden import '{module}'; {rule}")
        } else {
            format!("replace the disallowed import '{module}' with an allowed alternative; {rule}")
        },
        severity: HintSeverity::Error,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
