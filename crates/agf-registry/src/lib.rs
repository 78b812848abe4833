// SPDX-License-Identifier: MIT OR Apache-2.0
//! agf-registry
//!
//! The live table of installed capability modules, scoped by tenant, with
//! per-module circuit breakers and a deterministic resource-aware router.
//!
//! Writes are serialized behind one lock; readers take copy-on-write
//! snapshots, so routing is computed against a coherent, immutable view.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Per-module circuit breakers.
pub mod circuit;
/// Deterministic routing over registry snapshots.
pub mod router;

use agf_core::{AdapterRunResult, ModuleManifest, ModuleStatus, ResourceHints};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::info;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitState};
pub use router::{RouteCandidate, RouteQuery, RoutingDecision, RouterWeights, recommend};

/// A dispatchable capability module behind a polymorphic interface.
#[async_trait]
pub trait ModuleHandle: Send + Sync {
    /// Adapter kind tag (matches the manifest's capability family).
    fn kind(&self) -> &str;

    /// Invoke the module with JSON arguments.
    async fn invoke(&self, args: serde_json::Value) -> AdapterRunResult;
}

/// Errors from registry mutations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The `(module_id, version)` pair is already registered for the org.
    #[error("duplicate registration: {module_id} v{version}")]
    Duplicate {
        /// Module id.
        module_id: String,
        /// Version that was already present.
        version: String,
    },

    /// The referenced module or version does not exist.
    #[error("module not found: {module_id}")]
    NotFound {
        /// Module id that was looked up.
        module_id: String,
    },

    /// The manifest failed basic shape checks.
    #[error("invalid manifest: {reason}")]
    InvalidManifest {
        /// What was wrong.
        reason: String,
    },
}

struct VersionEntry {
    manifest: ModuleManifest,
    handle: Arc<dyn ModuleHandle>,
}

#[derive(Default)]
struct ModuleSlot {
    versions: BTreeMap<String, VersionEntry>,
    active: Option<String>,
}

#[derive(Default)]
struct OrgTable {
    modules: BTreeMap<String, ModuleSlot>,
}

/// One module in an immutable registry snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    /// Module id.
    pub module_id: String,
    /// Active version.
    pub version: String,
    /// Capability tags.
    pub capabilities: Vec<String>,
    /// Resource hints.
    pub resources: ResourceHints,
    /// Lifecycle status.
    pub status: ModuleStatus,
    /// Circuit state at snapshot time.
    pub circuit: CircuitState,
}

/// Immutable view of one org's active modules.
///
/// Concurrent readers always see a coherent table; the live registry can
/// mutate freely afterwards without affecting existing snapshots.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    /// Entries ordered by module id.
    pub entries: Vec<SnapshotEntry>,
}

/// Tenant-scoped registry of installed modules.
#[derive(Default)]
pub struct ModuleRegistry {
    orgs: RwLock<BTreeMap<String, OrgTable>>,
    circuits: RwLock<BTreeMap<(String, String), Arc<CircuitBreaker>>>,
    circuit_config: CircuitConfig,
}

impl ModuleRegistry {
    /// An empty registry with default circuit configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty registry with the given circuit configuration.
    #[must_use]
    pub fn with_circuit_config(circuit_config: CircuitConfig) -> Self {
        Self {
            circuit_config,
            ..Self::default()
        }
    }

    /// Register a module version. Atomic; rejects duplicates on
    /// `(module_id, version)` within the org. When the manifest's status is
    /// `active`, the active pointer is swapped to this version in the same
    /// critical section.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Duplicate`] on an already-registered pair,
    /// [`RegistryError::InvalidManifest`] on malformed ids.
    pub fn register(
        &self,
        manifest: ModuleManifest,
        handle: Arc<dyn ModuleHandle>,
    ) -> Result<(), RegistryError> {
        if manifest.category().is_none() {
            return Err(RegistryError::InvalidManifest {
                reason: format!("module_id '{}' is not category/platform", manifest.module_id),
            });
        }
        if manifest.org_id.is_empty() {
            return Err(RegistryError::InvalidManifest {
                reason: "org_id must not be empty".to_string(),
            });
        }

        let mut orgs = self.orgs.write().expect("registry lock poisoned");
        let slot = orgs
            .entry(manifest.org_id.clone())
            .or_default()
            .modules
            .entry(manifest.module_id.clone())
            .or_default();

        if slot.versions.contains_key(&manifest.version) {
            return Err(RegistryError::Duplicate {
                module_id: manifest.module_id,
                version: manifest.version,
            });
        }

        let activate = manifest.status == ModuleStatus::Active;
        let version = manifest.version.clone();
        let module_id = manifest.module_id.clone();
        let org_id = manifest.org_id.clone();
        slot.versions.insert(
            version.clone(),
            VersionEntry {
                manifest,
                handle,
            },
        );
        if activate {
            slot.active = Some(version.clone());
        }
        drop(orgs);

        self.circuits
            .write()
            .expect("circuit lock poisoned")
            .entry((org_id.clone(), module_id.clone()))
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.circuit_config.clone())));

        info!(
            target: "forge.registry",
            org = %org_id,
            module = %module_id,
            version = %version,
            activated = activate,
            "module registered"
        );
        Ok(())
    }

    /// Atomically point `module_id` at `version` and mark it active.
    ///
    /// The prior active version stays registered for rollback.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when the module or version is missing.
    pub fn promote(
        &self,
        org_id: &str,
        module_id: &str,
        version: &str,
    ) -> Result<(), RegistryError> {
        let mut orgs = self.orgs.write().expect("registry lock poisoned");
        let slot = orgs
            .get_mut(org_id)
            .and_then(|t| t.modules.get_mut(module_id))
            .ok_or_else(|| RegistryError::NotFound {
                module_id: module_id.to_string(),
            })?;
        let entry = slot
            .versions
            .get_mut(version)
            .ok_or_else(|| RegistryError::NotFound {
                module_id: format!("{module_id}@{version}"),
            })?;
        entry.manifest.status = ModuleStatus::Active;
        let previous = slot.active.replace(version.to_string());
        if let Some(prev) = previous
            && prev != version
            && let Some(prev_entry) = slot.versions.get_mut(&prev)
        {
            prev_entry.manifest.status = ModuleStatus::Disabled;
        }
        Ok(())
    }

    /// Disable live dispatch for a module. In-flight calls hold their own
    /// `Arc` handle and finish undisturbed.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when the module is missing.
    pub fn unregister(&self, org_id: &str, module_id: &str) -> Result<(), RegistryError> {
        let mut orgs = self.orgs.write().expect("registry lock poisoned");
        let slot = orgs
            .get_mut(org_id)
            .and_then(|t| t.modules.get_mut(module_id))
            .ok_or_else(|| RegistryError::NotFound {
                module_id: module_id.to_string(),
            })?;
        slot.active = None;
        for entry in slot.versions.values_mut() {
            entry.manifest.status = ModuleStatus::Disabled;
        }
        Ok(())
    }

    /// The dispatch handle for the active version of `module_id`, unless the
    /// module is disabled or its circuit is open.
    #[must_use]
    pub fn handle(&self, org_id: &str, module_id: &str) -> Option<Arc<dyn ModuleHandle>> {
        let orgs = self.orgs.read().expect("registry lock poisoned");
        let slot = orgs.get(org_id)?.modules.get(module_id)?;
        let active = slot.active.as_ref()?;
        let entry = slot.versions.get(active)?;
        if entry.manifest.status != ModuleStatus::Active {
            return None;
        }
        Some(Arc::clone(&entry.handle))
    }

    /// The circuit breaker for `module_id` (created on registration).
    #[must_use]
    pub fn circuit(&self, org_id: &str, module_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuits
            .read()
            .expect("circuit lock poisoned")
            .get(&(org_id.to_string(), module_id.to_string()))
            .cloned()
    }

    /// The active manifest for `module_id`, if any.
    #[must_use]
    pub fn active_manifest(&self, org_id: &str, module_id: &str) -> Option<ModuleManifest> {
        let orgs = self.orgs.read().expect("registry lock poisoned");
        let slot = orgs.get(org_id)?.modules.get(module_id)?;
        let active = slot.active.as_ref()?;
        slot.versions.get(active).map(|e| e.manifest.clone())
    }

    /// Copy-on-write snapshot of the org's modules with live circuit states.
    ///
    /// Queries without an org scope are not expressible: the org id is a
    /// required parameter everywhere.
    #[must_use]
    pub fn snapshot(&self, org_id: &str) -> RegistrySnapshot {
        let orgs = self.orgs.read().expect("registry lock poisoned");
        let circuits = self.circuits.read().expect("circuit lock poisoned");
        let Some(table) = orgs.get(org_id) else {
            return RegistrySnapshot::default();
        };

        let mut entries = Vec::new();
        for (module_id, slot) in &table.modules {
            let Some(active) = &slot.active else { continue };
            let Some(entry) = slot.versions.get(active) else {
                continue;
            };
            let circuit = circuits
                .get(&(org_id.to_string(), module_id.clone()))
                .map_or(CircuitState::Closed, |c| c.state());
            entries.push(SnapshotEntry {
                module_id: module_id.clone(),
                version: active.clone(),
                capabilities: entry.manifest.capabilities.clone(),
                resources: entry.manifest.resources.clone(),
                status: entry.manifest.status,
                circuit,
            });
        }
        RegistrySnapshot { entries }
    }
}
