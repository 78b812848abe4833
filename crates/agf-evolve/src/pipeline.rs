// SPDX-License-Identifier: MIT OR Apache-2.0
//! The evolution pipeline: scaffold → gate → implement → test → repair.
//!
//! The pipeline drives a module from natural-language intent to an
//! installed, attested capability. Every validation attempt appends an
//! immutable record to the job's audit log; the repair loop is bounded,
//! fingerprint-aware, and stops immediately on terminal failure categories.
//! Outcomes are reported, never raised: infrastructure problems surface as
//! `BuildStatus::Error` so the orchestrator can decide whether to pause.

use crate::audit::{AttemptRecord, BuildAuditLog, TerminalReason};
use crate::confidence::{DEFAULT_GATE_THRESHOLD, score_blueprint};
use crate::fingerprint::failure_fingerprint;
use crate::installer::{AttestedInstall, InstallError, Installer};
use crate::prompt::{RoleLibrary, StageContext, StageKind, compose_prompt, generator_output_schema};
use crate::scaffold::{Scaffold, has_template, scaffold_module, write_scaffold};
use crate::session::BuildRequest;
use agf_cancel::CancellationToken;
use agf_core::{
    GeneratorResponse, ModuleManifest, bundle_from_dir, validate_generator_output,
};
use agf_gateway::{Gateway, GatewayError, GenerateRequest, Purpose};
use agf_policy::ExecutionPolicy;
use agf_registry::{ModuleHandle, ModuleRegistry};
use agf_validate::{ModuleValidator, ValidationStatus};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Pipeline tuning, usually sourced from `agf-config`.
#[derive(Debug, Clone)]
pub struct EvolveConfig {
    /// Maximum repair iterations per job.
    pub max_repair_attempts: u32,
    /// Blueprint confidence gate threshold.
    pub confidence_threshold: f64,
    /// Bounded scaffold regenerations before giving up.
    pub max_scaffold_regens: u32,
}

impl Default for EvolveConfig {
    fn default() -> Self {
        Self {
            max_repair_attempts: 10,
            confidence_threshold: DEFAULT_GATE_THRESHOLD,
            max_scaffold_regens: 2,
        }
    }
}

impl From<&agf_config::ForgeConfig> for EvolveConfig {
    fn from(config: &agf_config::ForgeConfig) -> Self {
        Self {
            max_repair_attempts: config.max_repair_attempts,
            ..Self::default()
        }
    }
}

/// Terminal status of a build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    /// Validated, attested, installed, and registered.
    Installed,
    /// Two consecutive attempts failed with the same fingerprint.
    Thrashing,
    /// A terminal failure category stopped the loop.
    Terminal,
    /// The repair budget ran out.
    AttemptsExhausted,
    /// The blueprint never cleared the confidence gate.
    ScaffoldRejected,
    /// Infrastructure failure; the orchestrator may pause the job.
    Error,
}

/// Outcome of one stage, in execution order.
#[derive(Debug, Clone)]
pub struct StageReport {
    /// Stage name.
    pub stage: String,
    /// Whether the stage completed.
    pub passed: bool,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
    /// Error text on failure.
    pub message: Option<String>,
}

/// The pipeline's final report for a job.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Deterministic job id.
    pub job_id: String,
    /// Terminal status.
    pub status: BuildStatus,
    /// Target module id.
    pub module_id: String,
    /// Installed version (install only).
    pub version: Option<String>,
    /// Attested bundle hash (install only).
    pub bundle_sha256: Option<String>,
    /// Validation attempts recorded.
    pub attempt_count: u32,
    /// Repair iterations consumed.
    pub repair_count: u32,
    /// Fingerprint of the last failing attempt.
    pub last_fingerprint: Option<String>,
    /// Concise human diagnosis for failures.
    pub diagnosis: Option<String>,
    /// Per-stage reports.
    pub stages: Vec<StageReport>,
}

/// Creates dispatch handles for freshly installed modules.
pub type HandleFactory =
    Arc<dyn Fn(&Path, &ModuleManifest) -> Arc<dyn ModuleHandle> + Send + Sync>;

/// The self-evolution pipeline.
pub struct EvolutionPipeline {
    gateway: Arc<Gateway>,
    validator: ModuleValidator,
    audit: BuildAuditLog,
    installer: Installer,
    registry: Option<(Arc<ModuleRegistry>, HandleFactory)>,
    roles: RoleLibrary,
    config: EvolveConfig,
    work_root: PathBuf,
}

impl EvolutionPipeline {
    /// Create a pipeline working under `work_root`.
    ///
    /// Layout: `work_root/<job_id>/<module_root>/` for staged sources,
    /// `work_root/<job_id>/artifacts/` for run artifacts,
    /// `work_root/audit/` for audit logs, `work_root/modules/` for installs.
    #[must_use]
    pub fn new(gateway: Arc<Gateway>, work_root: impl Into<PathBuf>) -> Self {
        let work_root = work_root.into();
        Self {
            gateway,
            validator: ModuleValidator::new(),
            audit: BuildAuditLog::new(work_root.join("audit")),
            installer: Installer::new(work_root.join("modules")),
            registry: None,
            roles: RoleLibrary::builtin(),
            config: EvolveConfig::default(),
            work_root,
        }
    }

    /// Replace the pipeline configuration.
    #[must_use]
    pub fn with_config(mut self, config: EvolveConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the validator (test command overrides, observe-only sandbox).
    #[must_use]
    pub fn with_validator(mut self, validator: ModuleValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Register installed modules with `registry`, creating handles through
    /// `factory`.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ModuleRegistry>, factory: HandleFactory) -> Self {
        self.registry = Some((registry, factory));
        self
    }

    /// Replace the role library.
    #[must_use]
    pub fn with_roles(mut self, roles: RoleLibrary) -> Self {
        self.roles = roles;
        self
    }

    /// The audit log store.
    #[must_use]
    pub fn audit(&self) -> &BuildAuditLog {
        &self.audit
    }

    /// The installer.
    #[must_use]
    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    /// Run a complete build job for `request`.
    pub async fn run_build(
        &self,
        request: &BuildRequest,
        cancel: &CancellationToken,
    ) -> BuildOutcome {
        let job_id = request.job_id();
        let policy = ExecutionPolicy::by_name(&request.policy_profile)
            .unwrap_or_else(ExecutionPolicy::module_validation);
        let mut stages: Vec<StageReport> = Vec::new();

        info!(
            target: "forge.evolve",
            job_id = %job_id,
            intent = %request.intent,
            profile = %policy.name,
            "build job starting"
        );

        // -- scaffold + confidence gate -----------------------------------
        let scaffold_start = Instant::now();
        let scaffold = match self.scaffold_with_gate(request, &policy, cancel).await {
            Ok(s) => s,
            Err(outcome_status) => {
                stages.push(stage_report("scaffold", false, scaffold_start, None));
                return self.finish(
                    &job_id,
                    request,
                    outcome_status,
                    0,
                    0,
                    None,
                    Some("blueprint never cleared the confidence gate".to_string()),
                    stages,
                );
            }
        };
        let module_dir = self.work_root.join(&job_id).join(&scaffold.module_root);
        if let Err(e) = write_scaffold(&module_dir, &scaffold) {
            stages.push(stage_report("scaffold", false, scaffold_start, Some(e.to_string())));
            return self.finish(
                &job_id,
                request,
                BuildStatus::Error,
                0,
                0,
                None,
                Some(format!("failed to stage scaffold: {e}")),
                stages,
            );
        }
        stages.push(stage_report("scaffold", true, scaffold_start, None));

        // -- implement -----------------------------------------------------
        let implement_start = Instant::now();
        let context = StageContext {
            stage: StageKind::Implement,
            attempt_index: 0,
            intent: request.intent.clone(),
            constraints: request.constraints.clone(),
            module_id: scaffold.module_id.clone(),
            module_root: scaffold.module_root.clone(),
            prior_bundle_sha256: Some(scaffold.bundle.bundle_sha256.clone()),
            repair_hints: Vec::new(),
            policy_profile: request.policy_profile.clone(),
            manifest_snapshot: read_manifest(&module_dir),
        };
        match self
            .generate_and_apply(Purpose::Codegen, request, &context, &module_dir, cancel)
            .await
        {
            Ok(()) => stages.push(stage_report("implement", true, implement_start, None)),
            Err(diagnosis) => {
                stages.push(stage_report("implement", false, implement_start, Some(diagnosis.clone())));
                return self.finish(
                    &job_id,
                    request,
                    BuildStatus::Error,
                    0,
                    0,
                    None,
                    Some(diagnosis),
                    stages,
                );
            }
        }

        // -- test / repair loop -------------------------------------------
        let max_attempts = self.config.max_repair_attempts.saturating_add(1);
        let mut prior_fingerprint: Option<String> = None;
        let mut repair_count: u32 = 0;
        let artifact_dir = self.work_root.join(&job_id).join("artifacts");
        // Idempotent reruns merge into the same audit log; attempt indices
        // continue where the prior run stopped.
        let base_attempt = self
            .audit
            .attempts(&job_id)
            .map(|attempts| attempts.len() as u32)
            .unwrap_or(0);

        for attempt_index in 0..max_attempts {
            let test_start = Instant::now();
            let bundle = match bundle_from_dir(&module_dir) {
                Ok(b) => b,
                Err(e) => {
                    return self.finish(
                        &job_id,
                        request,
                        BuildStatus::Error,
                        attempt_index,
                        repair_count,
                        prior_fingerprint,
                        Some(format!("bundle computation failed: {e}")),
                        stages,
                    );
                }
            };

            let mut options = self.validator.options().clone();
            options.artifact_dir = Some(artifact_dir.clone());
            let validator = self.validator.clone().with_options(options);
            let report = validator.validate(&module_dir, &policy, cancel).await;
            let fingerprint = failure_fingerprint(&report);
            let status = report.status;
            let hints = report.fix_hints.clone();
            let has_terminal = report.has_terminal_hint();

            let record = AttemptRecord::new(
                base_attempt + attempt_index,
                bundle.bundle_sha256.clone(),
                report,
                request.org_id.clone(),
                request.correlation_id,
            );
            if let Err(e) = self.audit.append_attempt(&job_id, record) {
                return self.finish(
                    &job_id,
                    request,
                    BuildStatus::Error,
                    attempt_index,
                    repair_count,
                    Some(fingerprint),
                    Some(format!("audit append failed: {e}")),
                    stages,
                );
            }
            stages.push(stage_report(
                "test",
                status == ValidationStatus::Validated,
                test_start,
                None,
            ));

            match status {
                ValidationStatus::Validated => {
                    return self
                        .install_and_register(
                            &job_id,
                            request,
                            &scaffold,
                            &module_dir,
                            &bundle.bundle_sha256,
                            attempt_index + 1,
                            repair_count,
                            stages,
                        )
                        .await;
                }
                ValidationStatus::Error => {
                    return self.finish(
                        &job_id,
                        request,
                        BuildStatus::Error,
                        attempt_index + 1,
                        repair_count,
                        Some(fingerprint),
                        Some("validation infrastructure error; not retried automatically".to_string()),
                        stages,
                    );
                }
                ValidationStatus::Failed => {
                    if has_terminal {
                        let _ = self.audit.append_closed(
                            &job_id,
                            TerminalReason::Terminal,
                            Some(fingerprint.clone()),
                        );
                        return self.finish(
                            &job_id,
                            request,
                            BuildStatus::Terminal,
                            attempt_index + 1,
                            repair_count,
                            Some(fingerprint),
                            Some(diagnose(&hints, "terminal policy/security failure")),
                            stages,
                        );
                    }

                    if prior_fingerprint.as_deref() == Some(fingerprint.as_str()) {
                        let _ = self.audit.append_closed(
                            &job_id,
                            TerminalReason::Thrashing,
                            Some(fingerprint.clone()),
                        );
                        return self.finish(
                            &job_id,
                            request,
                            BuildStatus::Thrashing,
                            attempt_index + 1,
                            repair_count,
                            Some(fingerprint),
                            Some(diagnose(&hints, "two consecutive attempts failed identically")),
                            stages,
                        );
                    }
                    prior_fingerprint = Some(fingerprint.clone());

                    if attempt_index + 1 >= max_attempts {
                        let _ = self.audit.append_closed(
                            &job_id,
                            TerminalReason::AttemptsExhausted,
                            Some(fingerprint.clone()),
                        );
                        return self.finish(
                            &job_id,
                            request,
                            BuildStatus::AttemptsExhausted,
                            attempt_index + 1,
                            repair_count,
                            Some(fingerprint),
                            Some(diagnose(&hints, "repair budget exhausted")),
                            stages,
                        );
                    }

                    // -- repair -------------------------------------------
                    repair_count += 1;
                    let repair_start = Instant::now();
                    let context = StageContext {
                        stage: StageKind::Repair,
                        attempt_index: attempt_index + 1,
                        intent: request.intent.clone(),
                        constraints: request.constraints.clone(),
                        module_id: scaffold.module_id.clone(),
                        module_root: scaffold.module_root.clone(),
                        prior_bundle_sha256: Some(bundle.bundle_sha256.clone()),
                        repair_hints: hints,
                        policy_profile: request.policy_profile.clone(),
                        manifest_snapshot: read_manifest(&module_dir),
                    };
                    match self
                        .generate_and_apply(Purpose::Repair, request, &context, &module_dir, cancel)
                        .await
                    {
                        Ok(()) => {
                            stages.push(stage_report("repair", true, repair_start, None));
                        }
                        Err(diagnosis) => {
                            stages.push(stage_report("repair", false, repair_start, Some(diagnosis.clone())));
                            return self.finish(
                                &job_id,
                                request,
                                BuildStatus::Error,
                                attempt_index + 1,
                                repair_count,
                                Some(fingerprint),
                                Some(diagnosis),
                                stages,
                            );
                        }
                    }
                }
            }
        }

        // max_attempts >= 1 and every branch above returns; handle gracefully.
        self.finish(
            &job_id,
            request,
            BuildStatus::Error,
            max_attempts,
            repair_count,
            prior_fingerprint,
            Some("repair loop exited without a terminal outcome".to_string()),
            stages,
        )
    }

    async fn scaffold_with_gate(
        &self,
        request: &BuildRequest,
        policy: &ExecutionPolicy,
        cancel: &CancellationToken,
    ) -> Result<Scaffold, BuildStatus> {
        for regen in 0..=self.config.max_scaffold_regens {
            if cancel.is_cancelled() {
                return Err(BuildStatus::Error);
            }
            let scaffold = if has_template(request) {
                scaffold_module(request)
            } else {
                // Gateway-driven scaffold for unknown categories.
                match self.gateway_scaffold(request, cancel).await {
                    Some(s) => s,
                    None => return Err(BuildStatus::Error),
                }
            };
            let score = score_blueprint(&scaffold.files, policy);
            if score.passes(self.config.confidence_threshold) {
                return Ok(scaffold);
            }
            warn!(
                target: "forge.evolve",
                composite = score.composite,
                regen,
                "blueprint below confidence gate"
            );
            // Template scaffolds are deterministic; regenerating cannot
            // change the score.
            if has_template(request) {
                break;
            }
        }
        Err(BuildStatus::ScaffoldRejected)
    }

    async fn gateway_scaffold(
        &self,
        request: &BuildRequest,
        cancel: &CancellationToken,
    ) -> Option<Scaffold> {
        let module_id = crate::scaffold::derive_module_id(request);
        let module_root = module_id.replace('/', "_");
        let context = StageContext {
            stage: StageKind::Scaffold,
            attempt_index: 0,
            intent: request.intent.clone(),
            constraints: request.constraints.clone(),
            module_id: module_id.clone(),
            module_root: module_root.clone(),
            prior_bundle_sha256: None,
            repair_hints: Vec::new(),
            policy_profile: request.policy_profile.clone(),
            manifest_snapshot: None,
        };
        let response = self
            .call_generator(Purpose::Codegen, request, &context, cancel)
            .await
            .ok()?;
        let files: Vec<(String, String)> = response
            .changed_files
            .iter()
            .map(|f| {
                let rel = f
                    .path
                    .strip_prefix(&format!("{module_root}/"))
                    .unwrap_or(&f.path);
                (rel.to_string(), f.content.clone())
            })
            .collect();
        let bundle = agf_core::build_bundle(
            files
                .iter()
                .map(|(p, c)| (p.clone(), c.clone().into_bytes())),
        );
        Some(Scaffold {
            module_id,
            module_root,
            files,
            bundle,
        })
    }

    /// Call the gateway, validate the generator contract, and write the
    /// changed files under `module_dir`. Contract errors are never retried.
    async fn generate_and_apply(
        &self,
        purpose: Purpose,
        request: &BuildRequest,
        context: &StageContext,
        module_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), String> {
        let response = self
            .call_generator(purpose, request, context, cancel)
            .await?;

        for file in &response.changed_files {
            let rel = file
                .path
                .strip_prefix(&format!("{}/", context.module_root))
                .unwrap_or(&file.path);
            let full = module_dir.join(rel);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).map_err(|e| format!("stage file dir: {e}"))?;
            }
            std::fs::write(&full, &file.content).map_err(|e| format!("stage file: {e}"))?;
        }
        Ok(())
    }

    async fn call_generator(
        &self,
        purpose: Purpose,
        request: &BuildRequest,
        context: &StageContext,
        cancel: &CancellationToken,
    ) -> Result<GeneratorResponse, String> {
        let prompt = compose_prompt(&self.roles, context);
        let schema = generator_output_schema();
        let generate = GenerateRequest {
            prompt,
            system: None,
            job_id: request.job_id(),
            org_id: request.org_id.clone(),
            correlation_id: request.correlation_id,
        };

        let response = self
            .gateway
            .generate(purpose, &generate, Some(&schema), cancel)
            .await
            .map_err(|e| match &e {
                GatewayError::AllModelsFailed { attempts, .. } => format!(
                    "all models failed ({} preferences tried, last: {:?})",
                    attempts.len(),
                    attempts.last().and_then(|a| a.error_class.clone())
                ),
                other => other.to_string(),
            })?;

        let payload = response
            .payload
            .ok_or_else(|| "gateway returned no structured payload".to_string())?;
        validate_generator_output(&payload, &context.module_root).map_err(|e| e.to_string())
    }

    #[allow(clippy::too_many_arguments)]
    async fn install_and_register(
        &self,
        job_id: &str,
        request: &BuildRequest,
        scaffold: &Scaffold,
        module_dir: &Path,
        bundle_sha256: &str,
        attempt_count: u32,
        repair_count: u32,
        mut stages: Vec<StageReport>,
    ) -> BuildOutcome {
        let install_start = Instant::now();
        let attestation = AttestedInstall {
            module_id: scaffold.module_id.clone(),
            bundle_sha256: bundle_sha256.to_string(),
            status: ValidationStatus::Validated,
            validated_at: chrono::Utc::now(),
        };

        let outcome = match self.installer.install(Some(&attestation), module_dir) {
            Ok(o) => o,
            Err(InstallError::Rejected { reason, .. }) => {
                let _ = self
                    .audit
                    .append_reject(job_id, &scaffold.module_id, reason.as_str());
                stages.push(stage_report("install", false, install_start, Some(reason.as_str().to_string())));
                return self.finish(
                    job_id,
                    request,
                    BuildStatus::Error,
                    attempt_count,
                    repair_count,
                    None,
                    Some(format!("install rejected: {}", reason.as_str())),
                    stages,
                );
            }
            Err(e) => {
                stages.push(stage_report("install", false, install_start, Some(e.to_string())));
                return self.finish(
                    job_id,
                    request,
                    BuildStatus::Error,
                    attempt_count,
                    repair_count,
                    None,
                    Some(e.to_string()),
                    stages,
                );
            }
        };
        let _ = self.audit.append_install(
            job_id,
            &outcome.module_id,
            &outcome.bundle_sha256,
            &outcome.version,
        );

        // Register with the live registry as the active version.
        if let Some((registry, factory)) = &self.registry {
            if let Some(mut manifest) = read_manifest(&outcome.install_dir)
                .and_then(|doc| serde_json::from_value::<ModuleManifest>(doc).ok())
            {
                manifest.status = agf_core::ModuleStatus::Active;
                let handle = factory(&outcome.install_dir, &manifest);
                if let Err(e) = registry.register(manifest, handle) {
                    // Idempotent replays hit Duplicate; promotion still runs.
                    info!(target: "forge.evolve", error = %e, "registration skipped");
                }
                let _ = registry.promote(&request.org_id, &outcome.module_id, &outcome.version);
            }
        }

        stages.push(stage_report("install", true, install_start, None));
        info!(
            target: "forge.evolve",
            job_id = %job_id,
            module = %outcome.module_id,
            version = %outcome.version,
            "build job installed"
        );

        BuildOutcome {
            job_id: job_id.to_string(),
            status: BuildStatus::Installed,
            module_id: outcome.module_id,
            version: Some(outcome.version),
            bundle_sha256: Some(outcome.bundle_sha256),
            attempt_count,
            repair_count,
            last_fingerprint: None,
            diagnosis: None,
            stages,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        job_id: &str,
        request: &BuildRequest,
        status: BuildStatus,
        attempt_count: u32,
        repair_count: u32,
        last_fingerprint: Option<String>,
        diagnosis: Option<String>,
        stages: Vec<StageReport>,
    ) -> BuildOutcome {
        let module_id = crate::scaffold::derive_module_id(request);
        warn!(
            target: "forge.evolve",
            job_id = %job_id,
            status = ?status,
            attempts = attempt_count,
            repairs = repair_count,
            "build job closed without install"
        );
        BuildOutcome {
            job_id: job_id.to_string(),
            status,
            module_id,
            version: None,
            bundle_sha256: None,
            attempt_count,
            repair_count,
            last_fingerprint,
            diagnosis,
            stages,
        }
    }

}

fn stage_report(
    stage: &str,
    passed: bool,
    started: Instant,
    message: Option<String>,
) -> StageReport {
    StageReport {
        stage: stage.to_string(),
        passed,
        duration_ms: started.elapsed().as_millis() as u64,
        message,
    }
}

fn diagnose(hints: &[agf_validate::FixHint], fallback: &str) -> String {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for hint in hints {
        *counts.entry(hint.category.as_str()).or_insert(0) += 1;
    }
    let dominant = counts
        .iter()
        .max_by_key(|(_, count)| **count)
        .map(|(category, _)| *category);
    match dominant {
        Some(category) => format!(
            "{fallback}; dominant failure category: {category}; suggested action: review the module's {category} hints"
        ),
        None => fallback.to_string(),
    }
}

fn read_manifest(dir: &Path) -> Option<serde_json::Value> {
    let raw = std::fs::read_to_string(dir.join("manifest.json")).ok()?;
    serde_json::from_str(&raw).ok()
}
