// SPDX-License-Identifier: MIT OR Apache-2.0
//! Failure fingerprinting.
//!
//! A fingerprint is a stable hash over the *structural shape* of a
//! validation failure: which static checks failed, which tests failed, and
//! which fix-hint categories appeared. Two reports that fail the same way
//! fingerprint identically even when messages or timestamps differ; the
//! repair loop compares consecutive fingerprints to detect non-progress.

use agf_core::sha256_hex;
use agf_validate::ValidationReport;
use std::collections::BTreeSet;

/// Compute the failure fingerprint for `report`.
///
/// Components are sorted and deduplicated before hashing, so hint ordering
/// inside the report cannot change the result.
#[must_use]
pub fn failure_fingerprint(report: &ValidationReport) -> String {
    let mut error_types: BTreeSet<String> = BTreeSet::new();
    for check in &report.static_results {
        if !check.passed {
            error_types.insert(format!("static:{}", check.name));
        }
    }
    if report.runtime_results.errored > 0 {
        error_types.insert("runtime:error".to_string());
    }

    let failing_tests: BTreeSet<String> = report.failing_tests().into_iter().collect();

    let categories: BTreeSet<&'static str> = report
        .fix_hints
        .iter()
        .map(|h| h.category.as_str())
        .collect();

    let mut canonical = String::new();
    for e in &error_types {
        canonical.push_str(e);
        canonical.push('\n');
    }
    canonical.push('|');
    for t in &failing_tests {
        canonical.push_str(t);
        canonical.push('\n');
    }
    canonical.push('|');
    for c in &categories {
        canonical.push_str(c);
        canonical.push('\n');
    }

    sha256_hex(canonical.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agf_validate::{
        FixHint, FixHintCategory, HintSeverity, RuntimeResults, StaticCheck, ValidationStatus,
    };
    use chrono::Utc;

    fn report_with_hints(hints: Vec<FixHint>) -> ValidationReport {
        ValidationReport {
            status: ValidationStatus::Failed,
            static_results: vec![StaticCheck {
                name: "import_policy".to_string(),
                passed: true,
                detail: None,
            }],
            runtime_results: RuntimeResults::default(),
            fix_hints: hints,
            artifacts: vec![],
            validated_at: Utc::now(),
        }
    }

    fn test_hint(test: &str, message: &str) -> FixHint {
        FixHint {
            category: FixHintCategory::TestFailure,
            location: test.to_string(),
            suggestion: message.to_string(),
            severity: HintSeverity::Error,
        }
    }

    #[test]
    fn identical_shapes_fingerprint_identically() {
        let a = report_with_hints(vec![test_hint("test_parse", "expected 3 rows")]);
        let b = report_with_hints(vec![test_hint("test_parse", "different message text")]);
        // Messages differ; the structural shape does not.
        assert_eq!(failure_fingerprint(&a), failure_fingerprint(&b));
    }

    #[test]
    fn hint_order_is_irrelevant() {
        let a = report_with_hints(vec![test_hint("test_a", ""), test_hint("test_b", "")]);
        let b = report_with_hints(vec![test_hint("test_b", ""), test_hint("test_a", "")]);
        assert_eq!(failure_fingerprint(&a), failure_fingerprint(&b));
    }

    #[test]
    fn different_failing_tests_differ() {
        let a = report_with_hints(vec![test_hint("test_a", "")]);
        let b = report_with_hints(vec![test_hint("test_b", "")]);
        assert_ne!(failure_fingerprint(&a), failure_fingerprint(&b));
    }

    #[test]
    fn different_categories_differ() {
        let a = report_with_hints(vec![test_hint("test_a", "")]);
        let b = report_with_hints(vec![FixHint {
            category: FixHintCategory::ImportViolation,
            location: "test_a".to_string(),
            suggestion: String::new(),
            severity: HintSeverity::Error,
        }]);
        assert_ne!(failure_fingerprint(&a), failure_fingerprint(&b));
    }

    #[test]
    fn failed_static_checks_participate() {
        let mut a = report_with_hints(vec![]);
        let b = report_with_hints(vec![]);
        a.static_results[0].passed = false;
        assert_ne!(failure_fingerprint(&a), failure_fingerprint(&b));
    }

    #[test]
    fn timestamps_never_participate() {
        let mut a = report_with_hints(vec![test_hint("test_a", "")]);
        let b = report_with_hints(vec![test_hint("test_a", "")]);
        a.validated_at = Utc::now() + chrono::Duration::hours(5);
        assert_eq!(failure_fingerprint(&a), failure_fingerprint(&b));
    }
}
