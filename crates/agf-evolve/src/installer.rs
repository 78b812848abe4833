// SPDX-License-Identifier: MIT OR Apache-2.0
//! Attestation-guarded installer.
//!
//! The installer accepts exactly one input: an attestation binding a
//! `VALIDATED` report to a bundle hash. It recomputes the hash from the
//! staged files and rejects on any mismatch; rejections and successes are
//! both append-only log lines. Promotion is an atomic pointer swap and the
//! prior version stays on disk for rollback. Re-installing an identical
//! bundle is idempotent, which is what makes crash-replay safe.

use agf_core::{ModuleManifest, bundle_from_dir, validate_manifest};
use agf_validate::ValidationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The only input the installer accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestedInstall {
    /// Module to install.
    pub module_id: String,
    /// Bundle hash the validation report attests to.
    pub bundle_sha256: String,
    /// Validation status; anything but `VALIDATED` is rejected.
    pub status: ValidationStatus,
    /// When validation finished.
    pub validated_at: DateTime<Utc>,
}

/// Reason codes for rejected installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// The attestation does not report `VALIDATED`.
    NotValidated,
    /// The staged files recompute to a different bundle hash.
    HashMismatch,
    /// No attestation was supplied for the staged bundle.
    MissingAttestation,
}

impl RejectReason {
    /// Stable string form for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotValidated => "NOT_VALIDATED",
            Self::HashMismatch => "HASH_MISMATCH",
            Self::MissingAttestation => "MISSING_ATTESTATION",
        }
    }
}

/// One line of the install/rejection logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstallLogLine {
    module_id: String,
    bundle_sha256: String,
    outcome: String,
    timestamp: DateTime<Utc>,
}

/// A successful installation.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallOutcome {
    /// Installed module id.
    pub module_id: String,
    /// Installed version (from the staged manifest).
    pub version: String,
    /// Installed bundle hash.
    pub bundle_sha256: String,
    /// Where the version's files now live.
    pub install_dir: PathBuf,
}

/// Installer failure: either a guarded rejection or an infrastructure error.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// The install guard rejected the request (logged append-only).
    #[error("install rejected: {reason:?} for {module_id}")]
    Rejected {
        /// Module that was being installed.
        module_id: String,
        /// Reason code.
        reason: RejectReason,
    },

    /// The staged module's manifest is missing or invalid.
    #[error("staged manifest invalid for {module_id}: {detail}")]
    BadManifest {
        /// Module that was being installed.
        module_id: String,
        /// What was wrong.
        detail: String,
    },

    /// Filesystem failure while staging or promoting.
    #[error("install I/O failed for {module_id}")]
    Io {
        /// Module that was being installed.
        module_id: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl InstallError {
    /// The stable [`ErrorCode`](agf_error::ErrorCode) for this error.
    #[must_use]
    pub fn error_code(&self) -> agf_error::ErrorCode {
        match self {
            Self::Rejected {
                reason: RejectReason::HashMismatch,
                ..
            } => agf_error::ErrorCode::BundleHashMismatch,
            Self::Rejected { .. } => agf_error::ErrorCode::AttestationInvalid,
            Self::BadManifest { .. } => agf_error::ErrorCode::SchemaInvalid,
            Self::Io { .. } => agf_error::ErrorCode::RegistryCorrupt,
        }
    }
}

/// Attestation-guarded module installer.
#[derive(Debug, Clone)]
pub struct Installer {
    modules_root: PathBuf,
}

impl Installer {
    /// An installer managing `modules_root`.
    pub fn new(modules_root: impl Into<PathBuf>) -> Self {
        Self {
            modules_root: modules_root.into(),
        }
    }

    /// Path of the append-only rejection log.
    #[must_use]
    pub fn rejection_log(&self) -> PathBuf {
        self.modules_root.join("install_rejections.log")
    }

    /// Path of the append-only success log.
    #[must_use]
    pub fn install_log(&self) -> PathBuf {
        self.modules_root.join("installs.log")
    }

    /// Install the staged module at `staging_dir` under `attestation`.
    ///
    /// The bundle hash is recomputed from the staged files; any mismatch
    /// (or a non-`VALIDATED` attestation) appends a rejection line and
    /// returns [`InstallError::Rejected`]. On success the files are copied
    /// into a per-version directory and the `active.json` pointer is swapped
    /// atomically (write-temp + rename); prior versions remain for rollback.
    ///
    /// # Errors
    ///
    /// [`InstallError::Rejected`] on guard failure, [`InstallError::Io`] /
    /// [`InstallError::BadManifest`] on infrastructure problems.
    pub fn install(
        &self,
        attestation: Option<&AttestedInstall>,
        staging_dir: &Path,
    ) -> Result<InstallOutcome, InstallError> {
        let recomputed = bundle_from_dir(staging_dir).map_err(|e| InstallError::Io {
            module_id: attestation.map_or_else(String::new, |a| a.module_id.clone()),
            source: std::io::Error::other(e.to_string()),
        })?;

        let Some(attestation) = attestation else {
            self.log_reject("<unattested>", &recomputed.bundle_sha256, RejectReason::MissingAttestation);
            return Err(InstallError::Rejected {
                module_id: "<unattested>".to_string(),
                reason: RejectReason::MissingAttestation,
            });
        };

        if attestation.status != ValidationStatus::Validated {
            self.log_reject(
                &attestation.module_id,
                &attestation.bundle_sha256,
                RejectReason::NotValidated,
            );
            return Err(InstallError::Rejected {
                module_id: attestation.module_id.clone(),
                reason: RejectReason::NotValidated,
            });
        }

        if recomputed.bundle_sha256 != attestation.bundle_sha256 {
            warn!(
                target: "forge.install",
                module = %attestation.module_id,
                declared = %attestation.bundle_sha256,
                computed = %recomputed.bundle_sha256,
                "bundle hash mismatch"
            );
            self.log_reject(
                &attestation.module_id,
                &attestation.bundle_sha256,
                RejectReason::HashMismatch,
            );
            return Err(InstallError::Rejected {
                module_id: attestation.module_id.clone(),
                reason: RejectReason::HashMismatch,
            });
        }

        let manifest = read_staged_manifest(staging_dir, &attestation.module_id)?;

        let module_dir = self.modules_root.join(attestation.module_id.replace('/', "_"));
        let version_dir = module_dir.join("versions").join(&manifest.version);
        copy_tree(staging_dir, &version_dir).map_err(|e| InstallError::Io {
            module_id: attestation.module_id.clone(),
            source: e,
        })?;

        // Atomic pointer swap: write-temp then rename over active.json.
        let pointer = serde_json::json!({
            "module_id": attestation.module_id,
            "version": manifest.version,
            "bundle_sha256": attestation.bundle_sha256,
            "activated_at": Utc::now(),
        });
        let tmp = module_dir.join("active.json.tmp");
        let active = module_dir.join("active.json");
        let io_err = |source| InstallError::Io {
            module_id: attestation.module_id.clone(),
            source,
        };
        std::fs::write(&tmp, format!("{pointer}\n")).map_err(io_err)?;
        std::fs::rename(&tmp, &active).map_err(io_err)?;

        self.log_success(&attestation.module_id, &attestation.bundle_sha256);
        info!(
            target: "forge.install",
            module = %attestation.module_id,
            version = %manifest.version,
            bundle = %attestation.bundle_sha256,
            "module installed"
        );

        Ok(InstallOutcome {
            module_id: attestation.module_id.clone(),
            version: manifest.version,
            bundle_sha256: attestation.bundle_sha256.clone(),
            install_dir: version_dir,
        })
    }

    /// The currently active version pointer for `module_id`, if any.
    #[must_use]
    pub fn active_pointer(&self, module_id: &str) -> Option<serde_json::Value> {
        let path = self
            .modules_root
            .join(module_id.replace('/', "_"))
            .join("active.json");
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Versions retained on disk for `module_id`, sorted.
    #[must_use]
    pub fn retained_versions(&self, module_id: &str) -> Vec<String> {
        let versions_dir = self
            .modules_root
            .join(module_id.replace('/', "_"))
            .join("versions");
        let Ok(entries) = std::fs::read_dir(versions_dir) else {
            return Vec::new();
        };
        let mut versions: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .collect();
        versions.sort();
        versions
    }

    fn log_reject(&self, module_id: &str, bundle_sha256: &str, reason: RejectReason) {
        self.append_log(
            &self.rejection_log(),
            &InstallLogLine {
                module_id: module_id.to_string(),
                bundle_sha256: bundle_sha256.to_string(),
                outcome: reason.as_str().to_string(),
                timestamp: Utc::now(),
            },
        );
    }

    fn log_success(&self, module_id: &str, bundle_sha256: &str) {
        self.append_log(
            &self.install_log(),
            &InstallLogLine {
                module_id: module_id.to_string(),
                bundle_sha256: bundle_sha256.to_string(),
                outcome: "INSTALLED".to_string(),
                timestamp: Utc::now(),
            },
        );
    }

    fn append_log(&self, path: &Path, line: &InstallLogLine) {
        // Logging must not mask the primary outcome; failures are traced.
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(&self.modules_root)?;
            let json = serde_json::to_string(line).map_err(std::io::Error::other)?;
            let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{json}")?;
            file.sync_data()
        };
        if let Err(e) = write() {
            warn!(target: "forge.install", error = %e, "failed to append install log line");
        }
    }
}

fn read_staged_manifest(
    staging_dir: &Path,
    module_id: &str,
) -> Result<ModuleManifest, InstallError> {
    let raw = std::fs::read_to_string(staging_dir.join("manifest.json")).map_err(|e| {
        InstallError::BadManifest {
            module_id: module_id.to_string(),
            detail: format!("manifest.json unreadable: {e}"),
        }
    })?;
    let doc: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| InstallError::BadManifest {
            module_id: module_id.to_string(),
            detail: e.to_string(),
        })?;
    let validation = validate_manifest(&doc);
    if !validation.ok {
        return Err(InstallError::BadManifest {
            module_id: module_id.to_string(),
            detail: validation.errors.join("; "),
        });
    }
    serde_json::from_value(doc).map_err(|e| InstallError::BadManifest {
        module_id: module_id.to_string(),
        detail: e.to_string(),
    })
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
