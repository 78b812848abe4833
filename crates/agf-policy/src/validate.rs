// SPDX-License-Identifier: MIT OR Apache-2.0
//! Advisory validation for execution policies.

use crate::{ExecutionPolicy, is_forbidden_import};

/// A warning produced by [`validate_policy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyWarning {
    /// Machine-readable warning kind.
    pub kind: WarningKind,
    /// Human-readable description.
    pub message: String,
}

/// Categories of policy validation warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    /// Outbound network is enabled but the domain allowlist is empty.
    EmptyDomainAllowlist,
    /// An extra-allowed module is shadowed by the forbidden list.
    ShadowedAllowEntry,
    /// A resource cap is zero and will fail every run.
    ZeroResourceCap,
    /// A domain pattern is empty.
    EmptyDomainPattern,
}

/// Analyse `policy` and return any warnings found.
///
/// Warnings never block execution; they flag profiles that are internally
/// inconsistent or will deny everything at runtime.
#[must_use]
pub fn validate_policy(policy: &ExecutionPolicy) -> Vec<PolicyWarning> {
    let mut warnings = Vec::new();

    if policy.network.allow_outbound && policy.network.allowed_domains.is_empty() {
        warnings.push(PolicyWarning {
            kind: WarningKind::EmptyDomainAllowlist,
            message: "outbound network is enabled but no domains are allowlisted".to_string(),
        });
    }

    for domain in &policy.network.allowed_domains {
        if domain.is_empty() {
            warnings.push(PolicyWarning {
                kind: WarningKind::EmptyDomainPattern,
                message: "empty domain pattern in network allowlist".to_string(),
            });
        }
    }

    for module in &policy.imports.extra_allowed {
        if is_forbidden_import(module) {
            warnings.push(PolicyWarning {
                kind: WarningKind::ShadowedAllowEntry,
                message: format!(
                    "extra-allowed module '{module}' is shadowed by the forbidden list and will never be permitted"
                ),
            });
        }
    }

    if policy.resources.timeout_ms == 0 {
        warnings.push(PolicyWarning {
            kind: WarningKind::ZeroResourceCap,
            message: "timeout_ms is 0; every run will time out immediately".to_string(),
        });
    }
    if policy.resources.memory_mb == 0 {
        warnings.push(PolicyWarning {
            kind: WarningKind::ZeroResourceCap,
            message: "memory_mb is 0; every run will exceed the memory cap".to_string(),
        });
    }

    warnings
}
