// SPDX-License-Identifier: MIT OR Apache-2.0
//! agf-core
//!
//! The stable contract for Agent Forge.
//!
//! Defines the exact shapes the rest of the platform agrees on: module
//! manifests, generator output, content-addressed artifact bundles, and the
//! canonical run-result envelope. If you only take one dependency, take this
//! one.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Content-addressed artifact bundles.
pub mod bundle;
/// The canonical adapter run-result envelope.
pub mod envelope;
/// Generator output contract validation.
pub mod generator;
/// Module manifest schema and validation.
pub mod manifest;

use serde::Serialize;
use sha2::{Digest, Sha256};

pub use bundle::{ArtifactBundle, BundleEntry, BundleError, build_bundle, bundle_from_dir, verify_bundle};
pub use envelope::{
    AdapterRunResult, ArtifactDescriptor, ChartKind, EnvelopeError, EnvelopeErrorEntry, Metering,
    RunInfo, RunStatus, TraceContext, run_units, validate_chart_artifact,
};
pub use generator::{
    GeneratedFile, GeneratorOutputError, GeneratorResponse, MAX_GENERATED_FILES,
    MAX_GENERATED_BYTES, validate_generator_output,
};
pub use manifest::{
    ManifestValidation, ModuleManifest, ModuleStatus, ResourceHints, manifest_schema,
    validate_manifest,
};

/// Current contract version string embedded in all wire messages and records.
///
/// # Examples
///
/// ```
/// assert_eq!(agf_core::CONTRACT_VERSION, "forge/v0.1");
/// ```
pub const CONTRACT_VERSION: &str = "forge/v0.1";

/// Errors from contract-level operations (serialization, hashing).
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// JSON serialization or deserialization failed.
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Produce a deterministic JSON string for hashing.
///
/// This is not a full JCS implementation, but it is stable for our types:
/// - keys are sorted (serde_json Map is a BTreeMap by default)
/// - numbers are serialized consistently by serde_json
///
/// # Errors
///
/// Returns [`ContractError::Json`] if the value cannot be serialized.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, ContractError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
