// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content-addressed artifact bundles.
//!
//! A bundle is a deterministic digest over a set of `(path, bytes)` pairs:
//! each file is hashed individually, the entries are sorted by path, and the
//! bundle hash is computed over the canonical concatenation
//! `(path ‖ ":" ‖ hex_hash ‖ "\n")*`. Input ordering never affects the
//! result; two bundles with identical contents have identical hashes.

use crate::sha256_hex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A single file entry inside an [`ArtifactBundle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BundleEntry {
    /// Path relative to the bundle root.
    pub path: String,
    /// Hex-encoded SHA-256 of the file content.
    pub sha256: String,
    /// File size in bytes.
    pub size: u64,
}

/// Deterministic, content-addressed bundle of files produced by a build stage.
///
/// Immutable once built; referenced by attempt records and attestations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactBundle {
    /// Entries sorted by path (byte order).
    pub entries: Vec<BundleEntry>,
    /// Hex-encoded SHA-256 over the canonical sorted entry concatenation.
    pub bundle_sha256: String,
}

impl ArtifactBundle {
    /// Total size of all files in the bundle, in bytes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Number of files in the bundle.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    /// Returns the entry for `path`, if present.
    #[must_use]
    pub fn entry(&self, path: &str) -> Option<&BundleEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

/// Errors from reading a bundle back from disk.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// The bundle root directory could not be walked.
    #[error("failed to read bundle directory {path}")]
    ReadDir {
        /// Directory that was being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A file inside the bundle could not be read.
    #[error("failed to read bundle file {path}")]
    ReadFile {
        /// File that was being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A file path was not valid UTF-8.
    #[error("bundle file path is not valid UTF-8: {path}")]
    NonUtf8Path {
        /// Lossy rendering of the offending path.
        path: String,
    },
}

/// Build a bundle from in-memory `(path, bytes)` pairs.
///
/// Entries are sorted by path before hashing, so input ordering does not
/// affect the resulting `bundle_sha256`.
///
/// # Examples
///
/// ```
/// use agf_core::build_bundle;
///
/// let a = build_bundle([
///     ("adapter.py".to_string(), b"x = 1\n".to_vec()),
///     ("manifest.json".to_string(), b"{}\n".to_vec()),
/// ]);
/// let b = build_bundle([
///     ("manifest.json".to_string(), b"{}\n".to_vec()),
///     ("adapter.py".to_string(), b"x = 1\n".to_vec()),
/// ]);
/// assert_eq!(a.bundle_sha256, b.bundle_sha256);
/// ```
#[must_use]
pub fn build_bundle<I>(files: I) -> ArtifactBundle
where
    I: IntoIterator<Item = (String, Vec<u8>)>,
{
    let mut entries: Vec<BundleEntry> = files
        .into_iter()
        .map(|(path, bytes)| BundleEntry {
            sha256: sha256_hex(&bytes),
            size: bytes.len() as u64,
            path,
        })
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut canonical = String::new();
    for e in &entries {
        canonical.push_str(&e.path);
        canonical.push(':');
        canonical.push_str(&e.sha256);
        canonical.push('\n');
    }

    ArtifactBundle {
        bundle_sha256: sha256_hex(canonical.as_bytes()),
        entries,
    }
}

/// Recompute a bundle over `files` and compare against `expected_sha256`.
#[must_use]
pub fn verify_bundle<I>(files: I, expected_sha256: &str) -> bool
where
    I: IntoIterator<Item = (String, Vec<u8>)>,
{
    build_bundle(files).bundle_sha256 == expected_sha256
}

/// Build a bundle from every regular file under `root`.
///
/// Paths are recorded relative to `root` with `/` separators. Directory walk
/// order does not matter because entries are sorted before hashing.
///
/// # Errors
///
/// Returns [`BundleError`] if the directory cannot be walked or a file
/// cannot be read.
pub fn bundle_from_dir(root: &Path) -> Result<ArtifactBundle, BundleError> {
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| BundleError::ReadDir {
            path: root.display().to_string(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walkdir yields paths under root");
        let rel_str = rel
            .to_str()
            .ok_or_else(|| BundleError::NonUtf8Path {
                path: rel.to_string_lossy().to_string(),
            })?
            .replace(std::path::MAIN_SEPARATOR, "/");
        let bytes = std::fs::read(entry.path()).map_err(|e| BundleError::ReadFile {
            path: entry.path().display().to_string(),
            source: e,
        })?;
        files.push((rel_str, bytes));
    }
    Ok(build_bundle(files))
}
