// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only build audit log.
//!
//! One JSONL file per `job_id`. Every attempt, install, rejection, and
//! terminal marker is a line; lines are never edited. Each line carries its
//! own content hash so the log can be verified after the fact.

use crate::fingerprint::failure_fingerprint;
use agf_core::{canonical_json, sha256_hex};
use agf_validate::ValidationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use uuid::Uuid;

/// Immutable record of one validation attempt.
///
/// Like every mutation-log entry, carries the owning org and the end-to-end
/// correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Zero-indexed attempt number within the job.
    pub attempt_index: u32,
    /// Bundle hash the attempt validated.
    pub bundle_sha256: String,
    /// The full validation report.
    pub validation_report: ValidationReport,
    /// Structural failure fingerprint (stable across message changes).
    pub failure_fingerprint: String,
    /// When the attempt was recorded.
    pub timestamp: DateTime<Utc>,
    /// Version of the blueprint scorer in effect.
    pub scorer_version: String,
    /// Owning tenant.
    pub org_id: String,
    /// End-to-end correlation id.
    pub correlation_id: Uuid,
}

impl AttemptRecord {
    /// Build a record from a report, computing the fingerprint.
    #[must_use]
    pub fn new(
        attempt_index: u32,
        bundle_sha256: String,
        report: ValidationReport,
        org_id: impl Into<String>,
        correlation_id: Uuid,
    ) -> Self {
        let failure_fingerprint = failure_fingerprint(&report);
        Self {
            attempt_index,
            bundle_sha256,
            validation_report: report,
            failure_fingerprint,
            timestamp: Utc::now(),
            scorer_version: crate::confidence::SCORER_VERSION.to_string(),
            org_id: org_id.into(),
            correlation_id,
        }
    }
}

/// Why a job closed without an install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalReason {
    /// Two consecutive attempts shared a fingerprint.
    Thrashing,
    /// A terminal failure category (policy violation, security block).
    Terminal,
    /// The repair budget ran out.
    AttemptsExhausted,
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditLine {
    /// A validation attempt.
    Attempt {
        /// The record.
        record: AttemptRecord,
        /// Hash of the canonical record JSON.
        line_sha256: String,
    },
    /// A successful install.
    Install {
        /// Installed module id.
        module_id: String,
        /// Installed bundle hash.
        bundle_sha256: String,
        /// Installed version.
        version: String,
        /// When it happened.
        timestamp: DateTime<Utc>,
    },
    /// A rejected install.
    Reject {
        /// Reason code (`NOT_VALIDATED`, `HASH_MISMATCH`, `MISSING_ATTESTATION`).
        reason: String,
        /// Module id that was being installed.
        module_id: String,
        /// When it happened.
        timestamp: DateTime<Utc>,
    },
    /// The job closed without an install.
    Closed {
        /// Why.
        reason: TerminalReason,
        /// Fingerprint of the last attempt, when one exists.
        last_fingerprint: Option<String>,
        /// When it happened.
        timestamp: DateTime<Utc>,
    },
}

/// Result of verifying a job's audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditVerification {
    /// Number of attempt lines with valid hashes.
    pub valid_attempts: usize,
    /// Indices of attempt lines whose hash did not match.
    pub invalid_hashes: Vec<u32>,
    /// `true` when hashes are valid and attempt indices are contiguous from 0.
    pub is_valid: bool,
}

/// Errors from audit log I/O.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The log directory or file could not be accessed.
    #[error("audit log I/O failed for job '{job_id}'")]
    Io {
        /// Job whose log failed.
        job_id: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A line could not be serialized or parsed.
    #[error("audit log line is malformed for job '{job_id}': {detail}")]
    Malformed {
        /// Job whose log is malformed.
        job_id: String,
        /// Parse detail.
        detail: String,
    },
}

/// Append-only JSONL audit log store, one file per job.
#[derive(Debug, Clone)]
pub struct BuildAuditLog {
    root: PathBuf,
}

impl BuildAuditLog {
    /// A log store rooted at `root` (created on first append).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the JSONL file for `job_id`.
    #[must_use]
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("{job_id}.jsonl"))
    }

    /// Append an attempt record, wrapping it with its content hash.
    ///
    /// # Errors
    ///
    /// [`AuditError`] when the line cannot be serialized or written durably.
    pub fn append_attempt(&self, job_id: &str, record: AttemptRecord) -> Result<(), AuditError> {
        let line_sha256 = attempt_hash(&record, job_id)?;
        self.append_line(
            job_id,
            &AuditLine::Attempt {
                record,
                line_sha256,
            },
        )
    }

    /// Append an install success line.
    ///
    /// # Errors
    ///
    /// [`AuditError`] on I/O failure.
    pub fn append_install(
        &self,
        job_id: &str,
        module_id: &str,
        bundle_sha256: &str,
        version: &str,
    ) -> Result<(), AuditError> {
        self.append_line(
            job_id,
            &AuditLine::Install {
                module_id: module_id.to_string(),
                bundle_sha256: bundle_sha256.to_string(),
                version: version.to_string(),
                timestamp: Utc::now(),
            },
        )
    }

    /// Append an install rejection line.
    ///
    /// # Errors
    ///
    /// [`AuditError`] on I/O failure.
    pub fn append_reject(
        &self,
        job_id: &str,
        module_id: &str,
        reason: &str,
    ) -> Result<(), AuditError> {
        self.append_line(
            job_id,
            &AuditLine::Reject {
                reason: reason.to_string(),
                module_id: module_id.to_string(),
                timestamp: Utc::now(),
            },
        )
    }

    /// Append a terminal close line.
    ///
    /// # Errors
    ///
    /// [`AuditError`] on I/O failure.
    pub fn append_closed(
        &self,
        job_id: &str,
        reason: TerminalReason,
        last_fingerprint: Option<String>,
    ) -> Result<(), AuditError> {
        self.append_line(
            job_id,
            &AuditLine::Closed {
                reason,
                last_fingerprint,
                timestamp: Utc::now(),
            },
        )
    }

    /// Read every line for `job_id` (empty when the job has no log yet).
    ///
    /// # Errors
    ///
    /// [`AuditError::Malformed`] when a line fails to parse.
    pub fn read_all(&self, job_id: &str) -> Result<Vec<AuditLine>, AuditError> {
        let path = self.path_for(job_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AuditError::Io {
                    job_id: job_id.to_string(),
                    source: e,
                });
            }
        };
        content
            .lines()
            .map(|line| {
                serde_json::from_str::<AuditLine>(line).map_err(|e| AuditError::Malformed {
                    job_id: job_id.to_string(),
                    detail: e.to_string(),
                })
            })
            .collect()
    }

    /// The attempt records for `job_id` in append order.
    ///
    /// # Errors
    ///
    /// Propagates read errors from [`read_all`](Self::read_all).
    pub fn attempts(&self, job_id: &str) -> Result<Vec<AttemptRecord>, AuditError> {
        Ok(self
            .read_all(job_id)?
            .into_iter()
            .filter_map(|line| match line {
                AuditLine::Attempt { record, .. } => Some(record),
                _ => None,
            })
            .collect())
    }

    /// Verify hash integrity and attempt-index contiguity for `job_id`.
    ///
    /// # Errors
    ///
    /// Propagates read errors from [`read_all`](Self::read_all).
    pub fn verify(&self, job_id: &str) -> Result<AuditVerification, AuditError> {
        let lines = self.read_all(job_id)?;
        let mut valid_attempts = 0usize;
        let mut invalid_hashes = Vec::new();
        let mut expected_index = 0u32;
        let mut contiguous = true;

        for line in lines {
            if let AuditLine::Attempt {
                record,
                line_sha256,
            } = line
            {
                let computed = attempt_hash(&record, job_id)?;
                if computed == line_sha256 {
                    valid_attempts += 1;
                } else {
                    invalid_hashes.push(record.attempt_index);
                }
                if record.attempt_index != expected_index {
                    contiguous = false;
                }
                expected_index += 1;
            }
        }

        let is_valid = invalid_hashes.is_empty() && contiguous;
        Ok(AuditVerification {
            valid_attempts,
            invalid_hashes,
            is_valid,
        })
    }

    fn append_line(&self, job_id: &str, line: &AuditLine) -> Result<(), AuditError> {
        let io_err = |source| AuditError::Io {
            job_id: job_id.to_string(),
            source,
        };
        std::fs::create_dir_all(&self.root).map_err(io_err)?;
        let json = canonical_json(line).map_err(|e| AuditError::Malformed {
            job_id: job_id.to_string(),
            detail: e.to_string(),
        })?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(job_id))
            .map_err(io_err)?;
        writeln!(file, "{json}").map_err(io_err)?;
        // Writers coordinate per job; the line must be durable before the
        // attempt is reported complete.
        file.sync_data().map_err(io_err)?;
        Ok(())
    }
}

fn attempt_hash(record: &AttemptRecord, job_id: &str) -> Result<String, AuditError> {
    let json = canonical_json(record).map_err(|e| AuditError::Malformed {
        job_id: job_id.to_string(),
        detail: e.to_string(),
    })?;
    Ok(sha256_hex(json.as_bytes()))
}
