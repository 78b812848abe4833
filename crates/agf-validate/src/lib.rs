// SPDX-License-Identifier: MIT OR Apache-2.0
//! agf-validate
//!
//! Two-phase module validation: static checks (contract symbols, manifest
//! schema, path containment, import policy) followed by a sandboxed test run
//! whose junit artifact is folded into one merged [`ValidationReport`] with
//! actionable fix hints. The repair loop feeds those hints back to the model
//! verbatim.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Junit artifact parsing.
pub mod junit;
/// Merged report types and fix hints.
pub mod report;
/// The two-phase validator.
pub mod validator;

pub use junit::{JunitSummary, parse_junit};
pub use report::{
    FixHint, FixHintCategory, HintSeverity, RuntimeResults, StaticCheck, ValidationReport,
    ValidationStatus,
};
pub use validator::{ModuleValidator, ValidatorOptions};
