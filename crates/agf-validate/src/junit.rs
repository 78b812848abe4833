// SPDX-License-Identifier: MIT OR Apache-2.0
//! Minimal junit XML parsing.
//!
//! The sandbox produces a structured junit artifact; we only need suite
//! counts and the names of failing/erroring testcases, so this is a small
//! attribute scanner rather than a full XML parser.

use serde::{Deserialize, Serialize};

/// Counts and failing-test names extracted from a junit report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JunitSummary {
    /// Total tests executed.
    pub tests: u32,
    /// Assertion failures.
    pub failures: u32,
    /// Unexpected errors.
    pub errors: u32,
    /// Skipped tests.
    pub skipped: u32,
    /// Suite wall time in milliseconds.
    pub time_ms: u64,
    /// Names of failing or erroring testcases, in document order.
    pub failing_tests: Vec<FailingTest>,
}

/// One failing or erroring testcase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailingTest {
    /// `name` attribute of the testcase.
    pub name: String,
    /// First line of the failure/error message, when present.
    pub message: Option<String>,
    /// `true` for `<error>`, `false` for `<failure>`.
    pub errored: bool,
}

/// Parse a junit XML document.
///
/// Returns `None` when no `<testsuite` element is present.
#[must_use]
pub fn parse_junit(xml: &str) -> Option<JunitSummary> {
    let suite_start = xml.find("<testsuite")?;
    let suite_tag_end = xml[suite_start..].find('>')? + suite_start;
    let suite_tag = &xml[suite_start..suite_tag_end];

    let mut summary = JunitSummary {
        tests: attr_u32(suite_tag, "tests").unwrap_or(0),
        failures: attr_u32(suite_tag, "failures").unwrap_or(0),
        errors: attr_u32(suite_tag, "errors").unwrap_or(0),
        skipped: attr_u32(suite_tag, "skipped").unwrap_or(0),
        time_ms: attr(suite_tag, "time")
            .and_then(|t| t.parse::<f64>().ok())
            .map_or(0, |secs| (secs * 1000.0) as u64),
        failing_tests: Vec::new(),
    };

    // Scan testcase blocks for nested <failure> / <error> children.
    let mut rest = &xml[suite_tag_end..];
    while let Some(case_start) = rest.find("<testcase") {
        let after = &rest[case_start..];
        let Some(tag_close) = after.find('>') else { break };
        let tag = &after[..tag_close];
        let name = attr(tag, "name").unwrap_or_default();

        // Self-closing testcases passed; otherwise look inside the element.
        if !tag.trim_end().ends_with('/') {
            let body_end = after.find("</testcase>").unwrap_or(after.len());
            let body = &after[tag_close..body_end];
            let failure = body.find("<failure");
            let error = body.find("<error");
            if failure.is_some() || error.is_some() {
                let errored = error.is_some() && failure.is_none();
                let child_tag_start = error.or(failure).unwrap_or(0);
                let child = &body[child_tag_start..];
                let message = child
                    .find('>')
                    .map(|p| &child[..p])
                    .and_then(|t| attr(t, "message"));
                summary.failing_tests.push(FailingTest {
                    name,
                    message,
                    errored,
                });
            }
            rest = &after[body_end..];
        } else {
            rest = &after[tag_close..];
        }
    }

    Some(summary)
}

fn attr(tag: &str, name: &str) -> Option<String> {
    let needle = format!("{name}=\"");
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')? + start;
    Some(unescape(&tag[start..end]))
}

fn attr_u32(tag: &str, name: &str) -> Option<u32> {
    attr(tag, name)?.parse().ok()
}

fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSING: &str = r#"<?xml version="1.0"?>
<testsuite name="pytest" tests="3" failures="0" errors="0" skipped="0" time="0.12">
  <testcase classname="test_adapter" name="test_fetch" time="0.01"/>
  <testcase classname="test_adapter" name="test_parse" time="0.01"/>
  <testcase classname="test_adapter" name="test_errors" time="0.01"/>
</testsuite>"#;

    const FAILING: &str = r#"<?xml version="1.0"?>
<testsuite name="pytest" tests="2" failures="1" errors="0" skipped="0" time="0.50">
  <testcase classname="test_adapter" name="test_fetch" time="0.01"/>
  <testcase classname="test_adapter" name="test_parse" time="0.02">
    <failure message="AssertionError: expected 3 rows">trace here</failure>
  </testcase>
</testsuite>"#;

    const ERRORING: &str = r#"<testsuite tests="1" failures="0" errors="1" time="0.1">
  <testcase name="test_boom">
    <error message="RuntimeError: kaput">trace</error>
  </testcase>
</testsuite>"#;

    #[test]
    fn passing_suite_counts() {
        let s = parse_junit(PASSING).unwrap();
        assert_eq!(s.tests, 3);
        assert_eq!(s.failures, 0);
        assert_eq!(s.errors, 0);
        assert_eq!(s.time_ms, 120);
        assert!(s.failing_tests.is_empty());
    }

    #[test]
    fn failing_suite_extracts_test_name_and_message() {
        let s = parse_junit(FAILING).unwrap();
        assert_eq!(s.tests, 2);
        assert_eq!(s.failures, 1);
        assert_eq!(s.failing_tests.len(), 1);
        let failing = &s.failing_tests[0];
        assert_eq!(failing.name, "test_parse");
        assert_eq!(failing.message.as_deref(), Some("AssertionError: expected 3 rows"));
        assert!(!failing.errored);
    }

    #[test]
    fn erroring_testcase_is_marked_errored() {
        let s = parse_junit(ERRORING).unwrap();
        assert_eq!(s.errors, 1);
        assert_eq!(s.failing_tests.len(), 1);
        assert!(s.failing_tests[0].errored);
        assert_eq!(s.failing_tests[0].message.as_deref(), Some("RuntimeError: kaput"));
    }

    #[test]
    fn missing_suite_is_none() {
        assert!(parse_junit("<not-junit/>").is_none());
        assert!(parse_junit("").is_none());
    }

    #[test]
    fn escaped_attributes_are_unescaped() {
        let xml = r#"<testsuite tests="1" failures="1" time="0">
  <testcase name="test_cmp">
    <failure message="expected &quot;a&quot; &lt; &quot;b&quot;">t</failure>
  </testcase>
</testsuite>"#;
        let s = parse_junit(xml).unwrap();
        assert_eq!(
            s.failing_tests[0].message.as_deref(),
            Some(r#"expected "a" < "b""#)
        );
    }
}
