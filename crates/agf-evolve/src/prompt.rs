// SPDX-License-Identifier: MIT OR Apache-2.0
//! Prompt composition for build stages.
//!
//! Composition is pure: role artifact ⊕ stage context ⊕ required output
//! schema, in that order. Role artifacts are loaded once and cached; the
//! same context always produces byte-identical prompts.

use agf_validate::FixHint;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Named pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Skeleton generation.
    Scaffold,
    /// Behavioral implementation.
    Implement,
    /// Sandboxed validation.
    Test,
    /// Hint-driven repair.
    Repair,
}

impl StageKind {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scaffold => "scaffold",
            Self::Implement => "implement",
            Self::Test => "test",
            Self::Repair => "repair",
        }
    }
}

/// Everything a stage prompt is composed from.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Which stage this prompt drives.
    pub stage: StageKind,
    /// Zero-indexed attempt number.
    pub attempt_index: u32,
    /// User intent.
    pub intent: String,
    /// Normalized constraints.
    pub constraints: BTreeMap<String, String>,
    /// Target module id.
    pub module_id: String,
    /// Module root directory name (path allowlist prefix).
    pub module_root: String,
    /// Digest of the prior stage's bundle, when one exists.
    pub prior_bundle_sha256: Option<String>,
    /// Fix hints from the failing validation report (repair only).
    pub repair_hints: Vec<FixHint>,
    /// Policy profile the module must run under.
    pub policy_profile: String,
    /// Current manifest content, when one exists.
    pub manifest_snapshot: Option<serde_json::Value>,
}

/// Role artifacts, loaded once.
#[derive(Debug, Clone)]
pub struct RoleLibrary {
    roles: BTreeMap<String, String>,
}

impl Default for RoleLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RoleLibrary {
    /// The built-in builder/repairer role texts.
    #[must_use]
    pub fn builtin() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(
            "builder".to_string(),
            "You are a module builder for an agent platform. You produce small, \
             self-contained Python adapter modules that talk to external services \
             and pass their own tests on the first run."
                .to_string(),
        );
        roles.insert(
            "repairer".to_string(),
            "You are a module repairer. You receive a failing module and a list of \
             categorized fix hints. Apply the smallest change that resolves every \
             hint without regressing passing tests."
                .to_string(),
        );
        Self { roles }
    }

    /// Override or add a role text.
    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.roles.insert(name.into(), text.into());
    }

    /// The role text for `name`, falling back to the builder role.
    #[must_use]
    pub fn role(&self, name: &str) -> &str {
        self.roles
            .get(name)
            .or_else(|| self.roles.get("builder"))
            .map_or("", String::as_str)
    }
}

/// Compose the full prompt for a stage.
///
/// Pure: same inputs, same bytes out.
#[must_use]
pub fn compose_prompt(roles: &RoleLibrary, ctx: &StageContext) -> String {
    let role_name = match ctx.stage {
        StageKind::Repair => "repairer",
        _ => "builder",
    };

    let mut out = String::new();
    out.push_str(roles.role(role_name));
    out.push_str("\n\n## Task\n");
    out.push_str(&format!(
        "stage: {}\nattempt: {}\nmodule_id: {}\npolicy_profile: {}\n",
        ctx.stage.as_str(),
        ctx.attempt_index,
        ctx.module_id,
        ctx.policy_profile,
    ));
    out.push_str(&format!("intent: {}\n", ctx.intent));

    if !ctx.constraints.is_empty() {
        out.push_str("\n## Constraints\n");
        for (key, value) in &ctx.constraints {
            out.push_str(&format!("- {key}: {value}\n"));
        }
    }

    if let Some(sha) = &ctx.prior_bundle_sha256 {
        out.push_str(&format!("\nprior_bundle_sha256: {sha}\n"));
    }

    if let Some(manifest) = &ctx.manifest_snapshot {
        out.push_str("\n## Current manifest\n");
        out.push_str(&manifest.to_string());
        out.push('\n');
    }

    if !ctx.repair_hints.is_empty() {
        out.push_str("\n## Fix hints (resolve every one)\n");
        for hint in &ctx.repair_hints {
            out.push_str(&format!(
                "- [{}] {}: {}\n",
                hint.category.as_str(),
                hint.location,
                hint.suggestion
            ));
        }
    }

    out.push_str("\n## Output\n");
    out.push_str(
        "Respond with a single JSON object matching this schema exactly. \
         File contents must be complete and must not contain code-fence \
         delimiters. Paths must stay under the module root \"",
    );
    out.push_str(&ctx.module_root);
    out.push_str("\".\n");
    out.push_str(&generator_output_schema().to_string());
    out.push('\n');
    out
}

/// The JSON Schema the gateway enforces on generator responses.
#[must_use]
pub fn generator_output_schema() -> serde_json::Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://agent-forge.dev/schemas/generator-response/v1",
        "type": "object",
        "required": ["stage", "module_id", "changed_files", "policy_profile"],
        "additionalProperties": false,
        "properties": {
            "stage": { "type": "string" },
            "module_id": { "type": "string" },
            "changed_files": {
                "type": "array",
                "maxItems": 10,
                "items": {
                    "type": "object",
                    "required": ["path", "content"],
                    "additionalProperties": false,
                    "properties": {
                        "path": { "type": "string" },
                        "content": { "type": "string" }
                    }
                }
            },
            "assumptions": { "type": "array", "items": { "type": "string" } },
            "rationale": { "type": "string" },
            "policy_profile": { "type": "string" },
            "validation_report_echo": {}
        }
    })
}
