// SPDX-License-Identifier: MIT OR Apache-2.0
//! Template-driven module scaffolding.
//!
//! Scaffold is template-first: a registered category template produces the
//! three-file skeleton (manifest stub, adapter stub, test stub)
//! deterministically; the pipeline falls back to the gateway only when no
//! template covers the requested category. Either path honors the same
//! stage contract: one bundle, one confidence report.

use crate::session::BuildRequest;
use agf_core::{ArtifactBundle, build_bundle};
use serde_json::json;

/// Categories with built-in templates.
const TEMPLATED_CATEGORIES: &[&str] = &["weather", "finance", "health", "calendar", "tools"];

/// Keyword table for deriving a category from free-text intent.
const CATEGORY_KEYWORDS: &[(&str, &str)] = &[
    ("weather", "weather"),
    ("forecast", "weather"),
    ("stock", "finance"),
    ("price", "finance"),
    ("portfolio", "finance"),
    ("health", "health"),
    ("fitness", "health"),
    ("calendar", "calendar"),
    ("schedule", "calendar"),
    ("commute", "calendar"),
];

/// A freshly scaffolded module: files plus their bundle.
#[derive(Debug, Clone)]
pub struct Scaffold {
    /// Derived module id (`category/platform`).
    pub module_id: String,
    /// Module root directory name.
    pub module_root: String,
    /// `(relative path, content)` pairs.
    pub files: Vec<(String, String)>,
    /// Content-addressed bundle over the files.
    pub bundle: ArtifactBundle,
}

/// Derive `category/platform` from the request.
///
/// Explicit `category` / `platform` constraints win; otherwise the first
/// keyword hit picks the category and the remaining intent tokens provide a
/// platform slug. Deterministic for a fixed request.
#[must_use]
pub fn derive_module_id(request: &BuildRequest) -> String {
    let intent_lower = request.intent.to_lowercase();

    let category = request
        .constraints
        .get("category")
        .cloned()
        .or_else(|| {
            CATEGORY_KEYWORDS
                .iter()
                .find(|(keyword, _)| intent_lower.contains(keyword))
                .map(|(_, category)| (*category).to_string())
        })
        .unwrap_or_else(|| "tools".to_string());

    let platform = request
        .constraints
        .get("platform")
        .cloned()
        .or_else(|| {
            // "... for provider X" / "... from X" conventions.
            let tokens: Vec<&str> = intent_lower.split_whitespace().collect();
            tokens
                .windows(2)
                .find(|w| matches!(w[0], "provider" | "from" | "via" | "using"))
                .map(|w| slug(w[1]))
        })
        .unwrap_or_else(|| "generic".to_string());

    format!("{category}/{platform}")
}

fn slug(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Whether a built-in template exists for the request's category.
#[must_use]
pub fn has_template(request: &BuildRequest) -> bool {
    let module_id = derive_module_id(request);
    let category = module_id.split('/').next().unwrap_or("");
    TEMPLATED_CATEGORIES.contains(&category)
}

/// Produce the template scaffold for `request`.
///
/// Three files: manifest stub, adapter stub with the contract symbols, test
/// stub exercising them. The adapter body is intentionally minimal; the
/// implement stage replaces it.
#[must_use]
pub fn scaffold_module(request: &BuildRequest) -> Scaffold {
    let module_id = derive_module_id(request);
    let module_root = module_id.replace('/', "_");
    let (category, platform) = module_id.split_once('/').unwrap_or(("tools", "generic"));

    let manifest = json!({
        "module_id": module_id,
        "version": "1.0.0",
        "capabilities": ["rest_api"],
        "required_credentials": [],
        "resources": { "memory_mb": 64 },
        "status": "pending",
        "org_id": request.org_id,
    });
    let manifest_text = format!("{}\n", serde_json::to_string_pretty(&manifest).expect("static json"));

    let adapter = format!(
        r#"import json


def describe():
    return {{
        "module_id": "{module_id}",
        "category": "{category}",
        "platform": "{platform}",
        "capabilities": ["rest_api"],
    }}


def run(args):
    if args is None:
        raise ValueError("args must be a mapping")
    try:
        return {{"ok": True, "data": None, "args": dict(args)}}
    except (TypeError, ValueError) as exc:
        raise ValueError(f"invalid args: {{exc}}") from exc
"#
    );

    let test = r#"from adapter import describe, run


def test_describe_reports_identity():
    info = describe()
    assert info["capabilities"]


def test_run_rejects_none():
    try:
        run(None)
    except ValueError:
        pass
    else:
        raise AssertionError("expected ValueError")


def test_run_echoes_args():
    assert run({})["ok"]
"#
    .to_string();

    let files = vec![
        ("adapter.py".to_string(), adapter),
        ("manifest.json".to_string(), manifest_text),
        ("test_adapter.py".to_string(), test),
    ];
    let bundle = build_bundle(
        files
            .iter()
            .map(|(path, content)| (path.clone(), content.clone().into_bytes())),
    );

    Scaffold {
        module_id,
        module_root,
        files,
        bundle,
    }
}

/// Write scaffold files under `dir`.
///
/// # Errors
///
/// Returns the underlying I/O error when a file cannot be written.
pub fn write_scaffold(dir: &std::path::Path, scaffold: &Scaffold) -> std::io::Result<()> {
    for (path, content) in &scaffold.files {
        let full = dir.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, content)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::{DEFAULT_GATE_THRESHOLD, score_blueprint};
    use agf_core::validate_manifest;
    use agf_policy::ExecutionPolicy;

    #[test]
    fn weather_intent_derives_weather_module() {
        let request = BuildRequest::builder("build a weather tracker for provider openmeteo").build();
        assert_eq!(derive_module_id(&request), "weather/openmeteo");
    }

    #[test]
    fn explicit_constraints_win_over_keywords() {
        let request = BuildRequest::builder("build a weather tracker")
            .constraint("category", "finance")
            .constraint("platform", "alphavantage")
            .build();
        assert_eq!(derive_module_id(&request), "finance/alphavantage");
    }

    #[test]
    fn unknown_intent_falls_back_to_tools_generic() {
        let request = BuildRequest::builder("do something unusual").build();
        assert_eq!(derive_module_id(&request), "tools/generic");
        assert!(has_template(&request));
    }

    #[test]
    fn scaffold_produces_three_files_and_a_bundle() {
        let request = BuildRequest::builder("build a weather tracker for provider openmeteo").build();
        let scaffold = scaffold_module(&request);
        assert_eq!(scaffold.files.len(), 3);
        assert_eq!(scaffold.bundle.file_count(), 3);
        assert_eq!(scaffold.module_root, "weather_openmeteo");
    }

    #[test]
    fn scaffold_is_deterministic() {
        let request = BuildRequest::builder("build a weather tracker for provider openmeteo").build();
        let a = scaffold_module(&request);
        let b = scaffold_module(&request);
        assert_eq!(a.bundle.bundle_sha256, b.bundle.bundle_sha256);
    }

    #[test]
    fn scaffold_manifest_passes_schema_validation() {
        let request = BuildRequest::builder("build a weather tracker for provider openmeteo")
            .org_id("org-1")
            .build();
        let scaffold = scaffold_module(&request);
        let manifest_text = &scaffold
            .files
            .iter()
            .find(|(p, _)| p == "manifest.json")
            .unwrap()
            .1;
        let doc: serde_json::Value = serde_json::from_str(manifest_text).unwrap();
        let validation = validate_manifest(&doc);
        assert!(validation.ok, "{:?}", validation.errors);
    }

    #[test]
    fn scaffold_clears_the_confidence_gate() {
        let request = BuildRequest::builder("build a weather tracker for provider openmeteo").build();
        let scaffold = scaffold_module(&request);
        let score = score_blueprint(&scaffold.files, &ExecutionPolicy::module_validation());
        assert!(
            score.passes(DEFAULT_GATE_THRESHOLD),
            "template scaffold must clear its own gate: {score:?}"
        );
    }

    #[test]
    fn write_scaffold_round_trips_through_bundle_from_dir() {
        let request = BuildRequest::builder("build a weather tracker for provider openmeteo").build();
        let scaffold = scaffold_module(&request);
        let dir = tempfile::tempdir().unwrap();
        write_scaffold(dir.path(), &scaffold).unwrap();
        let from_disk = agf_core::bundle_from_dir(dir.path()).unwrap();
        assert_eq!(from_disk.bundle_sha256, scaffold.bundle.bundle_sha256);
    }
}
