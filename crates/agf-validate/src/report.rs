// SPDX-License-Identifier: MIT OR Apache-2.0
//! Merged validation report types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Overall outcome of a validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    /// Every static check passed, every test passed, no policy violation.
    Validated,
    /// A fixable problem: failing tests, invalid schema, fixable violation.
    Failed,
    /// Infrastructure broke (sandbox crash, unreadable module). Retryable
    /// only at orchestrator discretion, never automatically.
    Error,
}

/// One named static check and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StaticCheck {
    /// Check name (`required_files`, `contract_symbols`, `manifest_schema`,
    /// `path_containment`, `import_policy`).
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Failure detail when `passed` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregated counts from the sandboxed test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct RuntimeResults {
    /// Tests executed.
    pub tests_executed: u32,
    /// Tests that passed.
    pub passed: u32,
    /// Tests that failed (assertion failures).
    pub failed: u32,
    /// Tests that errored (raised unexpectedly).
    pub errored: u32,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

/// Category of a fix hint, aligned with the repair prompt vocabulary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FixHintCategory {
    /// A disallowed import (fixable by removing or substituting it).
    ImportViolation,
    /// A failing test.
    TestFailure,
    /// Manifest or payload schema problem.
    SchemaError,
    /// A required contract symbol is missing.
    MissingMethod,
    /// A policy violation that terminates the repair loop.
    PolicyViolation,
    /// A security gate block that terminates the repair loop.
    SecurityBlock,
}

impl FixHintCategory {
    /// Returns `true` when this category must stop the repair loop
    /// immediately without consuming further attempts.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PolicyViolation | Self::SecurityBlock)
    }

    /// Stable string form used in fingerprints and audit lines.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImportViolation => "import_violation",
            Self::TestFailure => "test_failure",
            Self::SchemaError => "schema_error",
            Self::MissingMethod => "missing_method",
            Self::PolicyViolation => "policy_violation",
            Self::SecurityBlock => "security_block",
        }
    }
}

/// How severe a hint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HintSeverity {
    /// Must be fixed for validation to pass.
    Error,
    /// Should be fixed; does not block validation alone.
    Warning,
}

/// An actionable, category-tagged suggestion extracted from a validation
/// failure. The repair loop uses these verbatim as model input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FixHint {
    /// Hint category.
    pub category: FixHintCategory,
    /// Where the problem is (file:line, test name, or manifest pointer).
    pub location: String,
    /// Targeted suggestion for the model.
    pub suggestion: String,
    /// Severity.
    pub severity: HintSeverity,
}

/// The merged output of static and runtime validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationReport {
    /// Overall status.
    pub status: ValidationStatus,
    /// Static check outcomes in execution order.
    pub static_results: Vec<StaticCheck>,
    /// Test run counts (zeroed when the run never happened).
    pub runtime_results: RuntimeResults,
    /// Actionable hints for the repair loop.
    pub fix_hints: Vec<FixHint>,
    /// Captured artifact paths (logs, junit).
    pub artifacts: Vec<String>,
    /// When validation finished.
    pub validated_at: DateTime<Utc>,
}

impl ValidationReport {
    /// Returns `true` when any hint carries a terminal category.
    #[must_use]
    pub fn has_terminal_hint(&self) -> bool {
        self.fix_hints.iter().any(|h| h.category.is_terminal())
    }

    /// Names of failing tests mentioned in test-failure hints, sorted.
    #[must_use]
    pub fn failing_tests(&self) -> Vec<String> {
        let mut tests: Vec<String> = self
            .fix_hints
            .iter()
            .filter(|h| h.category == FixHintCategory::TestFailure)
            .map(|h| h.location.clone())
            .collect();
        tests.sort();
        tests.dedup();
        tests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_categories() {
        assert!(FixHintCategory::PolicyViolation.is_terminal());
        assert!(FixHintCategory::SecurityBlock.is_terminal());
        assert!(!FixHintCategory::TestFailure.is_terminal());
        assert!(!FixHintCategory::ImportViolation.is_terminal());
    }

    #[test]
    fn status_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&ValidationStatus::Validated).unwrap(),
            "\"VALIDATED\""
        );
        assert_eq!(
            serde_json::to_string(&ValidationStatus::Error).unwrap(),
            "\"ERROR\""
        );
    }

    #[test]
    fn failing_tests_are_sorted_and_deduped() {
        let report = ValidationReport {
            status: ValidationStatus::Failed,
            static_results: vec![],
            runtime_results: RuntimeResults::default(),
            fix_hints: vec![
                FixHint {
                    category: FixHintCategory::TestFailure,
                    location: "test_b".to_string(),
                    suggestion: String::new(),
                    severity: HintSeverity::Error,
                },
                FixHint {
                    category: FixHintCategory::TestFailure,
                    location: "test_a".to_string(),
                    suggestion: String::new(),
                    severity: HintSeverity::Error,
                },
                FixHint {
                    category: FixHintCategory::TestFailure,
                    location: "test_a".to_string(),
                    suggestion: String::new(),
                    severity: HintSeverity::Error,
                },
            ],
            artifacts: vec![],
            validated_at: Utc::now(),
        };
        assert_eq!(report.failing_tests(), vec!["test_a", "test_b"]);
    }
}
