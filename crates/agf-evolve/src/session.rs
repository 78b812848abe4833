// SPDX-License-Identifier: MIT OR Apache-2.0
//! Build requests and deterministic job identity.
//!
//! Two invocations with identical normalized inputs produce the same
//! `job_id` and therefore merge into the same audit log; builds are
//! idempotent at the job level.

use agf_core::sha256_hex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A request to build a new capability module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BuildRequest {
    /// Natural-language intent ("build a weather tracker for provider X").
    pub intent: String,
    /// Normalized constraint key-values (deterministic ordering).
    #[serde(default)]
    pub constraints: BTreeMap<String, String>,
    /// Sandbox policy profile the module must run under.
    pub policy_profile: String,
    /// Owning tenant.
    pub org_id: String,
    /// End-to-end correlation id.
    pub correlation_id: Uuid,
}

impl BuildRequest {
    /// Start building a request.
    #[must_use]
    pub fn builder(intent: impl Into<String>) -> BuildRequestBuilder {
        BuildRequestBuilder::new(intent)
    }

    /// Deterministic job id: SHA-256 over the normalized
    /// `(intent, constraints, policy_profile)` triple.
    ///
    /// Whitespace runs and letter case in the intent do not affect the id;
    /// the correlation id never participates.
    #[must_use]
    pub fn job_id(&self) -> String {
        let normalized_intent = normalize_intent(&self.intent);
        let mut canonical = String::new();
        canonical.push_str(&normalized_intent);
        canonical.push('\n');
        for (key, value) in &self.constraints {
            canonical.push_str(key.trim());
            canonical.push('=');
            canonical.push_str(value.trim());
            canonical.push('\n');
        }
        canonical.push_str(&self.policy_profile);
        let digest = sha256_hex(canonical.as_bytes());
        // Shortened for filenames and log keys; 32 hex chars is plenty.
        digest[..32].to_string()
    }
}

/// Lowercase, collapse whitespace runs, trim.
fn normalize_intent(intent: &str) -> String {
    intent
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builder for [`BuildRequest`].
#[derive(Debug)]
pub struct BuildRequestBuilder {
    intent: String,
    constraints: BTreeMap<String, String>,
    policy_profile: String,
    org_id: String,
    correlation_id: Uuid,
}

impl BuildRequestBuilder {
    /// Create a builder with the given intent.
    #[must_use]
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            constraints: BTreeMap::new(),
            policy_profile: "module_validation".to_string(),
            org_id: "default".to_string(),
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Add a constraint key-value.
    #[must_use]
    pub fn constraint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }

    /// Set the policy profile.
    #[must_use]
    pub fn policy_profile(mut self, profile: impl Into<String>) -> Self {
        self.policy_profile = profile.into();
        self
    }

    /// Set the owning org.
    #[must_use]
    pub fn org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = org_id.into();
        self
    }

    /// Pin the correlation id (defaults to a fresh UUID).
    #[must_use]
    pub fn correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = id;
        self
    }

    /// Finish the request.
    #[must_use]
    pub fn build(self) -> BuildRequest {
        BuildRequest {
            intent: self.intent,
            constraints: self.constraints,
            policy_profile: self.policy_profile,
            org_id: self.org_id,
            correlation_id: self.correlation_id,
        }
    }
}
