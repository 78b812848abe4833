// SPDX-License-Identifier: MIT OR Apache-2.0
//! Subprocess sandbox runner.
//!
//! Each run is isolated: a fresh scratch directory, a generated runtime
//! hook, and a child process with its own cancellation path. Resource limits
//! are enforced by the host (container/cgroup); the runner enforces the
//! wall-clock timeout itself, records policy for the rest, and never raises
//! failure modes to callers.

use crate::hook::{VIOLATIONS_FILE, runtime_hook_preamble};
use crate::{
    ExecutionResult, FailureMode, ImportViolation, NetworkViolation, ResourceUsage,
    ViolationLayer,
};
use agf_cancel::CancellationToken;
use agf_policy::ExecutionPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Exit status commonly produced by the host OOM killer.
const OOM_EXIT_CODE: i32 = 137;

/// Cap on captured stdout/stderr, in bytes.
const CAPTURE_LIMIT: usize = 64 * 1024;

/// A single sandbox execution request.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Directory containing the module under test.
    pub module_dir: PathBuf,
    /// Program and arguments to execute (e.g. `["python", "-m", "pytest", ...]`).
    pub command: Vec<String>,
    /// Policy profile to enforce and declare.
    pub policy: ExecutionPolicy,
    /// Glob patterns (relative to the run dir) of artifacts to capture.
    pub artifact_globs: Vec<String>,
    /// Where captured artifacts are persisted. Kept outside the module
    /// sources so runs never perturb content-addressed bundles.
    pub artifact_dir: PathBuf,
    /// Grace period between terminate and hard kill on cancellation.
    pub grace: Duration,
}

impl RunRequest {
    /// A request with the standard pytest command for `module_dir`.
    #[must_use]
    pub fn pytest(module_dir: impl Into<PathBuf>, policy: ExecutionPolicy) -> Self {
        let module_dir = module_dir.into();
        let dir_name = module_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("module");
        let artifact_dir = module_dir
            .parent()
            .map_or_else(PathBuf::new, Path::to_path_buf)
            .join(format!("{dir_name}_run_artifacts"));
        Self {
            module_dir,
            command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "pytest".to_string(),
                "-q".to_string(),
                "--junitxml=junit.xml".to_string(),
            ],
            policy,
            artifact_globs: vec!["junit.xml".to_string(), "*.log".to_string()],
            artifact_dir,
            grace: Duration::from_millis(500),
        }
    }
}

/// Executes sandbox runs.
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    /// When `false`, the runner logs policy without a runtime hook;
    /// acceptable only for development.
    enforce: bool,
}

impl Default for SandboxRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxRunner {
    /// A runner with runtime enforcement enabled.
    #[must_use]
    pub fn new() -> Self {
        Self { enforce: true }
    }

    /// In-process development mode: declares policy, logs, does not enforce.
    #[must_use]
    pub fn observing() -> Self {
        Self { enforce: false }
    }

    /// Execute `request`, returning a complete [`ExecutionResult`].
    ///
    /// Infrastructure problems (scratch dir, spawn failure) are folded into
    /// `sandbox_fault`; they are distinct from failures of the code under
    /// test.
    pub async fn run(&self, request: &RunRequest, cancel: &CancellationToken) -> ExecutionResult {
        let scratch = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => return ExecutionResult::fault(format!("scratch dir: {e}")),
        };
        if let Err(e) = copy_tree(&request.module_dir, scratch.path()) {
            return ExecutionResult::fault(format!("stage module dir: {e}"));
        }

        if self.enforce {
            let preamble = runtime_hook_preamble(&request.policy);
            if let Err(e) = std::fs::write(scratch.path().join("sitecustomize.py"), preamble) {
                return ExecutionResult::fault(format!("write runtime hook: {e}"));
            }
        } else {
            warn!(
                target: "forge.sandbox",
                policy = %request.policy.name,
                "observe-only mode: runtime import hook disabled"
            );
        }

        let Some((program, args)) = request.command.split_first() else {
            return ExecutionResult::fault("empty command");
        };

        let timeout = Duration::from_millis(request.policy.resources.timeout_ms);
        let start = Instant::now();

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(scratch.path())
            .env("PYTHONPATH", scratch.path())
            .env("FORGE_POLICY_PROFILE", &request.policy.name)
            .env(
                "FORGE_MEMORY_MB",
                request.policy.resources.memory_mb.to_string(),
            )
            .env("FORGE_MAX_PROCS", request.policy.resources.max_procs.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ExecutionResult::fault(format!("spawn {program}: {e}")),
        };

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe {
                let _ = pipe.take(CAPTURE_LIMIT as u64).read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe {
                let _ = pipe.take(CAPTURE_LIMIT as u64).read_to_end(&mut buf).await;
            }
            buf
        });

        let mut timed_out = false;
        let mut cancelled = false;
        let exit_status = tokio::select! {
            status = child.wait() => status.ok(),
            () = tokio::time::sleep(timeout) => {
                timed_out = true;
                None
            }
            () = cancel.cancelled() => {
                cancelled = true;
                None
            }
        };
        if exit_status.is_none() {
            terminate(&mut child, request.grace).await;
        }

        let wall_time_ms = start.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();
        let exit_code = exit_status.and_then(|s| s.code());

        let mut import_violations = read_runtime_violations(scratch.path());
        // Static findings for the record: the validator normally scans
        // before running, but the runner re-reports so the result alone is
        // complete.
        let locals = crate::scan::local_module_names(scratch.path());
        for source in python_sources(scratch.path()) {
            import_violations.extend(crate::scan::static_check_with_locals(
                &source,
                &request.policy,
                &locals,
            ));
        }
        dedup_violations(&mut import_violations);

        let network_violations: Vec<NetworkViolation> = Vec::new();

        let artifacts = capture_artifacts(scratch.path(), &request.artifact_globs);
        // Artifacts must outlive the scratch dir.
        let artifacts = persist_artifacts(scratch.path(), &request.artifact_dir, &artifacts);

        let failure = if cancelled || timed_out {
            Some(FailureMode::Timeout)
        } else if !import_violations.is_empty() {
            Some(FailureMode::ImportViolation)
        } else if !network_violations.is_empty() {
            Some(FailureMode::NetworkViolation)
        } else {
            match exit_code {
                Some(0) => None,
                Some(OOM_EXIT_CODE) => Some(FailureMode::MemoryLimit),
                _ => Some(FailureMode::Crash),
            }
        };
        let success = failure.is_none() && exit_code == Some(0);

        debug!(
            target: "forge.sandbox",
            policy = %request.policy.name,
            wall_time_ms,
            exit_code = ?exit_code,
            failure = ?failure,
            violations = import_violations.len(),
            "sandbox run finished"
        );

        ExecutionResult {
            stdout,
            stderr,
            exit_code,
            usage: ResourceUsage {
                wall_time_ms,
                peak_memory_mb: None,
            },
            import_violations,
            network_violations,
            artifacts,
            success,
            failure,
            sandbox_fault: None,
        }
    }
}

/// Send the terminate signal, wait up to `grace` for exit, then hard kill.
async fn terminate(child: &mut tokio::process::Child, grace: Duration) {
    let _ = child.start_kill();
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

#[derive(Deserialize)]
struct RuntimeViolationLine {
    module: String,
    rule: String,
}

fn read_runtime_violations(run_dir: &Path) -> Vec<ImportViolation> {
    let path = run_dir.join(VIOLATIONS_FILE);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter_map(|line| serde_json::from_str::<RuntimeViolationLine>(line).ok())
        .map(|v| ImportViolation {
            module: v.module,
            layer: ViolationLayer::Runtime,
            line: None,
            rule: v.rule,
        })
        .collect()
}

fn dedup_violations(violations: &mut Vec<ImportViolation>) {
    let layer_rank = |layer: &ViolationLayer| match layer {
        ViolationLayer::Static => 0u8,
        ViolationLayer::Runtime => 1,
    };
    violations
        .sort_by(|a, b| (&a.module, layer_rank(&a.layer), a.line).cmp(&(&b.module, layer_rank(&b.layer), b.line)));
    violations.dedup();
}

fn python_sources(dir: &Path) -> Vec<String> {
    let mut sources = Vec::new();
    for entry in walkdir::WalkDir::new(dir).into_iter().flatten() {
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("py")
            && entry.file_name() != "sitecustomize.py"
            && let Ok(source) = std::fs::read_to_string(entry.path())
        {
            sources.push(source);
        }
    }
    sources
}

fn capture_artifacts(run_dir: &Path, globs: &[String]) -> Vec<String> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in globs {
        if let Ok(glob) = globset::Glob::new(pattern) {
            builder.add(glob);
        }
    }
    let Ok(set) = builder.build() else {
        return Vec::new();
    };

    let mut matches = Vec::new();
    for entry in walkdir::WalkDir::new(run_dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(run_dir)
            && set.is_match(rel)
            && let Some(rel_str) = rel.to_str()
        {
            matches.push(rel_str.to_string());
        }
    }
    matches.sort();
    matches
}

fn persist_artifacts(run_dir: &Path, artifact_dir: &Path, rel_paths: &[String]) -> Vec<String> {
    let mut kept = Vec::new();
    for rel in rel_paths {
        let src = run_dir.join(rel);
        let dst = artifact_dir.join(rel);
        if let Some(parent) = dst.parent()
            && std::fs::create_dir_all(parent).is_ok()
            && std::fs::copy(&src, &dst).is_ok()
        {
            kept.push(rel.clone());
        }
    }
    kept
}


fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
