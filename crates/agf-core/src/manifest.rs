// SPDX-License-Identifier: MIT OR Apache-2.0
//! Module manifest schema and strict validation.
//!
//! Manifests are validated against a versioned JSON Schema with
//! `additionalProperties: false`: unknown top-level keys are hard errors,
//! not warnings. Semantic checks (module id shape, semver) run after the
//! schema pass so error messages stay specific.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Versioned `$id` embedded in the manifest schema.
pub const MANIFEST_SCHEMA_ID: &str = "https://agent-forge.dev/schemas/module-manifest/v1";

/// Lifecycle status of a registered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    /// Live and dispatchable.
    Active,
    /// Registered but not dispatchable.
    Disabled,
    /// Last validation or health probe failed.
    Failed,
    /// Installed, awaiting promotion.
    Pending,
}

/// Resource hints the router uses to compute resource headroom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ResourceHints {
    /// Expected resident memory in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    /// Expected per-call latency in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<u64>,
    /// Relative CPU weight in `[0.0, 1.0]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_weight: Option<f64>,
}

/// Registered capability descriptor for a generated module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModuleManifest {
    /// Module identifier in `category/platform` form (e.g. `weather/openmeteo`).
    pub module_id: String,
    /// Semantic version (`major.minor.patch`).
    pub version: String,
    /// Free-form capability tags (e.g. `rest_api`, `oauth2`, `pagination`).
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Credential names the module requires at dispatch time.
    #[serde(default)]
    pub required_credentials: Vec<String>,
    /// Resource hints for routing.
    #[serde(default)]
    pub resources: ResourceHints,
    /// Lifecycle status.
    pub status: ModuleStatus,
    /// Owning tenant.
    pub org_id: String,
}

impl ModuleManifest {
    /// The `category` half of the module id, if well-formed.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.module_id.split_once('/').map(|(c, _)| c)
    }

    /// The `platform` half of the module id, if well-formed.
    #[must_use]
    pub fn platform(&self) -> Option<&str> {
        self.module_id.split_once('/').map(|(_, p)| p)
    }
}

/// Result of validating a manifest document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestValidation {
    /// `true` when the document passed every check.
    pub ok: bool,
    /// Validation failure messages (empty when `ok`).
    pub errors: Vec<String>,
}

impl ManifestValidation {
    fn ok() -> Self {
        Self {
            ok: true,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<String>) -> Self {
        Self { ok: false, errors }
    }
}

/// The strict JSON Schema every manifest document must satisfy.
///
/// Unknown top-level keys are rejected (`additionalProperties: false`).
#[must_use]
pub fn manifest_schema() -> serde_json::Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": MANIFEST_SCHEMA_ID,
        "type": "object",
        "additionalProperties": false,
        "required": ["module_id", "version", "status", "org_id"],
        "properties": {
            "module_id": { "type": "string", "minLength": 3 },
            "version": { "type": "string", "minLength": 5 },
            "capabilities": {
                "type": "array",
                "items": { "type": "string", "minLength": 1 }
            },
            "required_credentials": {
                "type": "array",
                "items": { "type": "string", "minLength": 1 }
            },
            "resources": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "memory_mb": { "type": "integer", "minimum": 0 },
                    "avg_latency_ms": { "type": "integer", "minimum": 0 },
                    "cpu_weight": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
                }
            },
            "status": { "enum": ["active", "disabled", "failed", "pending"] },
            "org_id": { "type": "string", "minLength": 1 }
        }
    })
}

/// Validate a manifest JSON document against the strict schema plus semantic
/// rules (module id shape, semver).
///
/// Returns `{ok: true}` or every error found; schema errors and semantic
/// errors are collected together so a caller sees the full picture in one
/// pass.
#[must_use]
pub fn validate_manifest(doc: &serde_json::Value) -> ManifestValidation {
    let schema = manifest_schema();
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(e) => {
            return ManifestValidation::failed(vec![format!("schema compilation failed: {e}")]);
        }
    };

    let mut errors: Vec<String> = validator
        .iter_errors(doc)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    // Semantic checks only make sense on a schema-shaped document.
    if errors.is_empty() {
        if let Some(module_id) = doc.get("module_id").and_then(|v| v.as_str())
            && !is_well_formed_module_id(module_id)
        {
            errors.push(format!(
                "module_id '{module_id}' must be 'category/platform' with non-empty halves"
            ));
        }
        if let Some(version) = doc.get("version").and_then(|v| v.as_str())
            && !is_semver(version)
        {
            errors.push(format!("version '{version}' is not a valid major.minor.patch"));
        }
    }

    if errors.is_empty() {
        ManifestValidation::ok()
    } else {
        ManifestValidation::failed(errors)
    }
}

fn is_well_formed_module_id(id: &str) -> bool {
    match id.split_once('/') {
        Some((category, platform)) => {
            !category.is_empty()
                && !platform.is_empty()
                && !platform.contains('/')
                && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-'))
        }
        None => false,
    }
}

fn is_semver(version: &str) -> bool {
    let mut parts = version.split('.');
    let valid = |s: Option<&str>| {
        s.is_some_and(|p| !p.is_empty() && p.len() <= 9 && p.chars().all(|c| c.is_ascii_digit()))
    };
    valid(parts.next()) && valid(parts.next()) && valid(parts.next()) && parts.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_doc() -> serde_json::Value {
        json!({
            "module_id": "weather/openmeteo",
            "version": "1.0.0",
            "capabilities": ["rest_api", "pagination"],
            "required_credentials": [],
            "resources": { "memory_mb": 64 },
            "status": "pending",
            "org_id": "org-1"
        })
    }

    #[test]
    fn valid_manifest_passes() {
        let result = validate_manifest(&valid_doc());
        assert!(result.ok, "errors: {:?}", result.errors);
    }

    #[test]
    fn unknown_top_level_key_is_an_error() {
        let mut doc = valid_doc();
        doc["favourite_colour"] = json!("blue");
        let result = validate_manifest(&doc);
        assert!(!result.ok);
        assert!(
            result.errors.iter().any(|e| e.contains("favourite_colour")),
            "errors: {:?}",
            result.errors
        );
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let mut doc = valid_doc();
        doc.as_object_mut().unwrap().remove("org_id");
        let result = validate_manifest(&doc);
        assert!(!result.ok);
    }

    #[test]
    fn malformed_module_id_is_rejected() {
        for bad in ["weather", "/openmeteo", "weather/", "a/b/c", "we ather/x"] {
            let mut doc = valid_doc();
            doc["module_id"] = json!(bad);
            let result = validate_manifest(&doc);
            assert!(!result.ok, "expected rejection for module_id {bad:?}");
        }
    }

    #[test]
    fn malformed_version_is_rejected() {
        for bad in ["1.0", "1.0.0.0", "v1.0.0", "1.0.x"] {
            let mut doc = valid_doc();
            doc["version"] = json!(bad);
            let result = validate_manifest(&doc);
            assert!(!result.ok, "expected rejection for version {bad:?}");
        }
    }

    #[test]
    fn status_outside_enum_is_rejected() {
        let mut doc = valid_doc();
        doc["status"] = json!("installing");
        assert!(!validate_manifest(&doc).ok);
    }

    #[test]
    fn manifest_roundtrips_through_serde() {
        let manifest: ModuleManifest = serde_json::from_value(valid_doc()).unwrap();
        assert_eq!(manifest.category(), Some("weather"));
        assert_eq!(manifest.platform(), Some("openmeteo"));
        let back = serde_json::to_value(&manifest).unwrap();
        assert!(validate_manifest(&back).ok);
    }
}
