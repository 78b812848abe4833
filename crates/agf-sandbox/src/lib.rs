// SPDX-License-Identifier: MIT OR Apache-2.0
//! agf-sandbox
//!
//! Executes untrusted generated code under a declared [`ExecutionPolicy`]
//! and emits an [`ExecutionResult`].
//!
//! Import enforcement is dual-layer: the static scanner rejects disallowed
//! targets before any code runs, and a runtime hook intercepts every import
//! at execution time and fails closed; reflection and deferred imports
//! cannot bypass it. Network enforcement is container/OS level in
//! production; the runner declares policy and records attempts. Failure
//! modes are reported in the result, never raised to callers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Runtime import-hook preamble generation.
pub mod hook;
/// Subprocess runner.
pub mod runner;
/// Static import scanning.
pub mod scan;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use hook::runtime_hook_preamble;
pub use runner::{RunRequest, SandboxRunner};
pub use scan::{
    ImportTarget, collect_imports, has_forbidden_import, local_module_names, static_check,
    static_check_with_locals,
};

/// Which enforcement layer produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ViolationLayer {
    /// Found by the pre-execution AST/source scan.
    Static,
    /// Intercepted by the runtime import hook.
    Runtime,
}

/// A disallowed import, with the layer that caught it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImportViolation {
    /// Dotted module path that was requested.
    pub module: String,
    /// Layer that caught the violation.
    pub layer: ViolationLayer,
    /// 1-indexed source line, when known (static layer only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// The policy rule that produced the denial.
    pub rule: String,
}

/// A denied network attempt recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NetworkViolation {
    /// Destination host.
    pub host: String,
    /// The policy rule that produced the denial.
    pub rule: String,
}

/// Why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureMode {
    /// Wall-clock timeout exceeded.
    Timeout,
    /// Memory cap exceeded.
    MemoryLimit,
    /// One or more import violations.
    ImportViolation,
    /// One or more network violations.
    NetworkViolation,
    /// The code under test crashed (nonzero exit).
    Crash,
}

/// Approximate resource usage for a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ResourceUsage {
    /// Wall-clock time in milliseconds.
    pub wall_time_ms: u64,
    /// Peak resident memory in megabytes, when the host reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_memory_mb: Option<u64>,
}

/// Complete record of a sandbox run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionResult {
    /// Captured standard output (possibly truncated).
    pub stdout: String,
    /// Captured standard error (possibly truncated).
    pub stderr: String,
    /// Process exit code, when the process ran to exit.
    pub exit_code: Option<i32>,
    /// Resource usage.
    pub usage: ResourceUsage,
    /// Import violations from both layers.
    pub import_violations: Vec<ImportViolation>,
    /// Denied network attempts.
    pub network_violations: Vec<NetworkViolation>,
    /// Paths of captured artifact files, relative to the run directory.
    pub artifacts: Vec<String>,
    /// `true` iff no violations, no timeout, and exit code zero.
    pub success: bool,
    /// Failure classification when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureMode>,
    /// Set when the sandbox itself broke (spawn failure, I/O error) rather
    /// than the code under test. Callers treat this as infrastructure error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_fault: Option<String>,
}

impl ExecutionResult {
    /// An empty failed result carrying only a sandbox fault.
    #[must_use]
    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            usage: ResourceUsage::default(),
            import_violations: Vec::new(),
            network_violations: Vec::new(),
            artifacts: Vec::new(),
            success: false,
            failure: None,
            sandbox_fault: Some(message.into()),
        }
    }
}
