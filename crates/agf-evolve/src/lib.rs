// SPDX-License-Identifier: MIT OR Apache-2.0
//! agf-evolve
//!
//! The self-evolution pipeline: drives a generated module from
//! natural-language intent to an installed, attested capability through
//! scaffold, confidence-gated implement, sandboxed test, and a bounded,
//! fingerprint-aware repair loop, with an append-only audit trail and an
//! attestation-guarded installer at the end.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Append-only build audit log.
pub mod audit;
/// Blueprint confidence scoring.
pub mod confidence;
/// Failure fingerprinting.
pub mod fingerprint;
/// Attestation-guarded installer.
pub mod installer;
/// The pipeline.
pub mod pipeline;
/// Prompt composition.
pub mod prompt;
/// Template scaffolding.
pub mod scaffold;
/// Build requests and job identity.
pub mod session;

pub use audit::{
    AttemptRecord, AuditError, AuditLine, AuditVerification, BuildAuditLog, TerminalReason,
};
pub use confidence::{BlueprintScore, DEFAULT_GATE_THRESHOLD, SCORER_VERSION, score_blueprint};
pub use fingerprint::failure_fingerprint;
pub use installer::{
    AttestedInstall, InstallError, InstallOutcome, Installer, RejectReason,
};
pub use pipeline::{
    BuildOutcome, BuildStatus, EvolutionPipeline, EvolveConfig, HandleFactory, StageReport,
};
pub use prompt::{
    RoleLibrary, StageContext, StageKind, compose_prompt, generator_output_schema,
};
pub use scaffold::{Scaffold, derive_module_id, has_template, scaffold_module, write_scaffold};
pub use session::{BuildRequest, BuildRequestBuilder};
