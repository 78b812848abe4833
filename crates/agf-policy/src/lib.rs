//! agf-policy
//!
//! Sandbox policy profiles for generated modules.
//!
//! A profile bundles a [`NetworkPolicy`], an [`ImportPolicy`], and a
//! [`ResourcePolicy`]. Profiles merge monotonically: scalars take the more
//! permissive value, allowlists union, and the forbidden-import list is a
//! crate-level constant that no profile can shrink.

/// Profile validation warnings.
pub mod validate;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use validate::{PolicyWarning, WarningKind, validate_policy};

// ---------------------------------------------------------------------------
// Forbidden imports
// ---------------------------------------------------------------------------

/// Imports that are terminal regardless of profile.
///
/// Process spawning, dynamic code evaluation, arbitrary module loading, and
/// filesystem-tree deletion. Matching is on the root module segment, so
/// `importlib.util` is caught by the `importlib` entry. Raw `__import__`
/// indirection is flagged separately by the scanner.
pub const FORBIDDEN_IMPORTS: &[&str] = &[
    "subprocess",
    "multiprocessing",
    "pty",
    "ctypes",
    "importlib",
    "shutil",
    "code",
    "codeop",
];

/// Returns `true` when `module` (or its root segment) is on the forbidden list.
#[must_use]
pub fn is_forbidden_import(module: &str) -> bool {
    let root = module.split('.').next().unwrap_or(module);
    FORBIDDEN_IMPORTS.contains(&root)
}

// ---------------------------------------------------------------------------
// Import categories
// ---------------------------------------------------------------------------

/// Named bundles of permitted third-party imports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ImportCategory {
    /// HTTP client libraries.
    HttpClients,
    /// Test frameworks.
    Testing,
    /// Data shaping and analysis libraries.
    DataProcessing,
}

impl ImportCategory {
    /// Root modules this category permits.
    #[must_use]
    pub fn modules(&self) -> &'static [&'static str] {
        match self {
            Self::HttpClients => &["requests", "httpx", "urllib3", "aiohttp"],
            Self::Testing => &["pytest", "unittest", "mock"],
            Self::DataProcessing => &["pandas", "numpy", "dateutil"],
        }
    }
}

/// Standard-library modules permitted in every profile.
const STDLIB_MODULES: &[&str] = &[
    "abc",
    "base64",
    "collections",
    "contextlib",
    "copy",
    "dataclasses",
    "datetime",
    "decimal",
    "enum",
    "functools",
    "hashlib",
    "io",
    "itertools",
    "json",
    "logging",
    "math",
    "os",
    "pathlib",
    "random",
    "re",
    "string",
    "sys",
    "time",
    "typing",
    "unittest",
    "urllib",
    "uuid",
];

// ---------------------------------------------------------------------------
// Policy pieces
// ---------------------------------------------------------------------------

/// Outbound network rules for a sandbox run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct NetworkPolicy {
    /// Whether any outbound traffic is permitted at all.
    pub allow_outbound: bool,
    /// Domains permitted when `allow_outbound` is set. Private and loopback
    /// destinations are always denied regardless of this list.
    #[serde(default)]
    pub allowed_domains: BTreeSet<String>,
    /// Connect timeout for allowlisted destinations, in milliseconds.
    #[serde(default)]
    pub connect_timeout_ms: u64,
}

impl NetworkPolicy {
    /// Fully blocked network (the default).
    #[must_use]
    pub fn blocked() -> Self {
        Self::default()
    }

    /// Returns `true` when a connection to `host` would be permitted.
    ///
    /// Private and loopback destinations are denied unconditionally.
    #[must_use]
    pub fn permits(&self, host: &str) -> bool {
        if is_private_or_loopback(host) {
            return false;
        }
        self.allow_outbound && self.allowed_domains.iter().any(|d| domain_matches(d, host))
    }
}

/// Returns `true` for loopback, link-local, and RFC-1918 destinations.
fn is_private_or_loopback(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".local") {
        return true;
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return ip.is_loopback()
            || match ip {
                std::net::IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
                std::net::IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
            };
    }
    false
}

/// `*.example.com` style suffix matching; exact match otherwise.
fn domain_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(suffix) => host.ends_with(suffix) && host.len() > suffix.len(),
        None => pattern == host,
    }
}

/// Import rules for a sandbox run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ImportPolicy {
    /// Permitted third-party categories (stdlib is always permitted).
    #[serde(default)]
    pub categories: BTreeSet<ImportCategory>,
    /// Extra individually-allowed root modules.
    #[serde(default)]
    pub extra_allowed: BTreeSet<String>,
}

/// Outcome of an import policy check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImportDecision {
    /// Whether the import is permitted.
    pub allowed: bool,
    /// The rule that produced this decision.
    pub rule: String,
}

impl ImportPolicy {
    /// Decide whether `module` may be imported under this policy.
    ///
    /// Forbidden entries win over every allowlist.
    #[must_use]
    pub fn decide(&self, module: &str) -> ImportDecision {
        let root = module.split('.').next().unwrap_or(module);

        if is_forbidden_import(root) {
            return ImportDecision {
                allowed: false,
                rule: format!("'{root}' is on the forbidden list"),
            };
        }
        if STDLIB_MODULES.contains(&root) {
            return ImportDecision {
                allowed: true,
                rule: "stdlib".to_string(),
            };
        }
        for category in &self.categories {
            if category.modules().contains(&root) {
                return ImportDecision {
                    allowed: true,
                    rule: format!("category {category:?}"),
                };
            }
        }
        if self.extra_allowed.contains(root) {
            return ImportDecision {
                allowed: true,
                rule: "extra allowlist".to_string(),
            };
        }
        ImportDecision {
            allowed: false,
            rule: format!("'{root}' is not in any allowed category"),
        }
    }
}

/// Resource caps for a sandbox run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResourcePolicy {
    /// Wall-clock timeout in milliseconds.
    pub timeout_ms: u64,
    /// Memory cap in megabytes.
    pub memory_mb: u64,
    /// Maximum number of processes.
    pub max_procs: u32,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            memory_mb: 256,
            max_procs: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionPolicy
// ---------------------------------------------------------------------------

/// A complete sandbox policy profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionPolicy {
    /// Profile name (`default`, `module_validation`, `integration_test`, or custom).
    pub name: String,
    /// Network rules.
    pub network: NetworkPolicy,
    /// Import rules.
    pub imports: ImportPolicy,
    /// Resource caps.
    pub resources: ResourcePolicy,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::default_profile()
    }
}

impl ExecutionPolicy {
    /// The `default` profile: stdlib only, network blocked, 30 s / 256 MB / 4 procs.
    #[must_use]
    pub fn default_profile() -> Self {
        Self {
            name: "default".to_string(),
            network: NetworkPolicy::blocked(),
            imports: ImportPolicy::default(),
            resources: ResourcePolicy::default(),
        }
    }

    /// The `module_validation` profile: adds http-client, testing, and
    /// data-processing categories; network still blocked.
    #[must_use]
    pub fn module_validation() -> Self {
        Self {
            name: "module_validation".to_string(),
            network: NetworkPolicy::blocked(),
            imports: ImportPolicy {
                categories: [
                    ImportCategory::HttpClients,
                    ImportCategory::Testing,
                    ImportCategory::DataProcessing,
                ]
                .into_iter()
                .collect(),
                extra_allowed: BTreeSet::new(),
            },
            resources: ResourcePolicy::default(),
        }
    }

    /// The `integration_test` profile: allowlisted outbound domains with a
    /// 5 s connect timeout. Private and loopback are always denied.
    #[must_use]
    pub fn integration_test(domains: impl IntoIterator<Item = String>) -> Self {
        let mut profile = Self::module_validation();
        profile.name = "integration_test".to_string();
        profile.network = NetworkPolicy {
            allow_outbound: true,
            allowed_domains: domains.into_iter().collect(),
            connect_timeout_ms: 5_000,
        };
        profile
    }

    /// Look up a built-in profile by name.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default_profile()),
            "module_validation" => Some(Self::module_validation()),
            "integration_test" => Some(Self::integration_test(Vec::new())),
            _ => None,
        }
    }

    /// Merge two profiles monotonically.
    ///
    /// Scalars take the more permissive value, allowlists union. The merge
    /// can never remove a forbidden entry: [`FORBIDDEN_IMPORTS`] is a
    /// constant consulted before any allowlist.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            name: format!("{}+{}", self.name, other.name),
            network: NetworkPolicy {
                allow_outbound: self.network.allow_outbound || other.network.allow_outbound,
                allowed_domains: self
                    .network
                    .allowed_domains
                    .union(&other.network.allowed_domains)
                    .cloned()
                    .collect(),
                connect_timeout_ms: self
                    .network
                    .connect_timeout_ms
                    .max(other.network.connect_timeout_ms),
            },
            imports: ImportPolicy {
                categories: self
                    .imports
                    .categories
                    .union(&other.imports.categories)
                    .copied()
                    .collect(),
                extra_allowed: self
                    .imports
                    .extra_allowed
                    .union(&other.imports.extra_allowed)
                    .cloned()
                    .collect(),
            },
            resources: ResourcePolicy {
                timeout_ms: self.resources.timeout_ms.max(other.resources.timeout_ms),
                memory_mb: self.resources.memory_mb.max(other.resources.memory_mb),
                max_procs: self.resources.max_procs.max(other.resources.max_procs),
            },
        }
    }
}
