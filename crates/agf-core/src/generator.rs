// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generator output contract.
//!
//! The gateway requires models to return a [`GeneratorResponse`] for build
//! and repair stages. Validation is strict and ordered: parse, required
//! fields, path allowlist, fence scan, size caps. The first failing class is
//! reported; contract errors are never retried.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum number of files a single generator response may change.
pub const MAX_GENERATED_FILES: usize = 10;

/// Maximum total content size (bytes) across all changed files.
pub const MAX_GENERATED_BYTES: usize = 100 * 1024;

/// A single file the generator wants to create or replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GeneratedFile {
    /// Path relative to the module root.
    pub path: String,
    /// Full file content (no code fences).
    pub content: String,
}

/// Structured output required from the model for build/repair stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeneratorResponse {
    /// Pipeline stage this response belongs to (`scaffold`, `implement`, `repair`).
    pub stage: String,
    /// Target module identifier.
    pub module_id: String,
    /// Files to write.
    pub changed_files: Vec<GeneratedFile>,
    /// Assumptions the model made while generating.
    #[serde(default)]
    pub assumptions: Vec<String>,
    /// Free-form rationale.
    #[serde(default)]
    pub rationale: String,
    /// Policy profile the module expects to run under.
    pub policy_profile: String,
    /// Echo of the validation report that triggered a repair, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_report_echo: Option<serde_json::Value>,
}

/// Contract violation classes for generator output.
///
/// These are surfaced to the caller and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeneratorOutputError {
    /// The payload was not parseable as the response shape.
    #[error("generator output is not valid JSON: {detail}")]
    InvalidJson {
        /// Parse error detail.
        detail: String,
    },
    /// A required field is absent or empty.
    #[error("generator output is missing required field '{field}'")]
    MissingField {
        /// Name of the missing field.
        field: String,
    },
    /// A changed-file path escapes the module root allowlist.
    #[error("generator output path '{path}' is outside module root '{root}'")]
    DisallowedPath {
        /// Offending path.
        path: String,
        /// Allowed root prefix.
        root: String,
    },
    /// File content contains code-fence delimiters.
    #[error("generator output for '{path}' contains code-fence delimiters")]
    FenceDetected {
        /// File whose content contains a fence.
        path: String,
    },
    /// File count or total byte size exceeds the caps.
    #[error("generator output exceeds size limits: {files} files, {bytes} bytes")]
    SizeExceeded {
        /// Number of changed files.
        files: usize,
        /// Total content bytes.
        bytes: usize,
    },
}

/// Validate a raw JSON value as a [`GeneratorResponse`] for `module_root`.
///
/// `module_root` is the only allowed path prefix; paths must be relative,
/// must not contain `..` components, and must resolve under the root.
///
/// # Errors
///
/// Returns the first [`GeneratorOutputError`] encountered, in the order:
/// parse → required fields → paths → fences → size.
pub fn validate_generator_output(
    value: &serde_json::Value,
    module_root: &str,
) -> Result<GeneratorResponse, GeneratorOutputError> {
    // Required fields are checked on the raw document first so "missing
    // field" is reported ahead of a generic deserialization failure.
    let obj = value
        .as_object()
        .ok_or_else(|| GeneratorOutputError::InvalidJson {
            detail: "expected a JSON object".to_string(),
        })?;
    for field in ["stage", "module_id", "changed_files", "policy_profile"] {
        match obj.get(field) {
            None | Some(serde_json::Value::Null) => {
                return Err(GeneratorOutputError::MissingField {
                    field: field.to_string(),
                });
            }
            Some(serde_json::Value::String(s)) if s.is_empty() => {
                return Err(GeneratorOutputError::MissingField {
                    field: field.to_string(),
                });
            }
            Some(_) => {}
        }
    }

    let response: GeneratorResponse =
        serde_json::from_value(value.clone()).map_err(|e| GeneratorOutputError::InvalidJson {
            detail: e.to_string(),
        })?;

    for file in &response.changed_files {
        if !path_is_under_root(&file.path, module_root) {
            return Err(GeneratorOutputError::DisallowedPath {
                path: file.path.clone(),
                root: module_root.to_string(),
            });
        }
    }

    for file in &response.changed_files {
        if file.content.contains("```") {
            return Err(GeneratorOutputError::FenceDetected {
                path: file.path.clone(),
            });
        }
    }

    let total_bytes: usize = response.changed_files.iter().map(|f| f.content.len()).sum();
    if response.changed_files.len() > MAX_GENERATED_FILES || total_bytes > MAX_GENERATED_BYTES {
        return Err(GeneratorOutputError::SizeExceeded {
            files: response.changed_files.len(),
            bytes: total_bytes,
        });
    }

    Ok(response)
}

/// Parse a raw string and validate it as generator output.
///
/// # Errors
///
/// Returns [`GeneratorOutputError::InvalidJson`] on parse failure, otherwise
/// delegates to [`validate_generator_output`].
pub fn validate_generator_output_str(
    raw: &str,
    module_root: &str,
) -> Result<GeneratorResponse, GeneratorOutputError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| GeneratorOutputError::InvalidJson {
            detail: e.to_string(),
        })?;
    validate_generator_output(&value, module_root)
}

fn path_is_under_root(path: &str, root: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return false;
    }
    if path.split('/').any(|seg| seg == ".." || seg == "." || seg.is_empty()) {
        return false;
    }
    // Root prefix match on whole path segments.
    path == root || path.starts_with(&format!("{root}/"))
}
