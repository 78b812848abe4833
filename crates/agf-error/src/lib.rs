//! Unified error taxonomy with stable error codes for Agent Forge.
//!
//! Every cross-component error carries an [`ErrorCode`] (a machine-readable,
//! stable string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context.  The taxonomy also encodes *retryability*:
//! the gateway and orchestrator consult [`ErrorCode::is_transient`] instead
//! of re-deriving it locally.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Generator/manifest contract violations. Never retried.
    Contract,
    /// Sandbox policy violations. Terminal for the attempt that caused them.
    Policy,
    /// Transient I/O failures. Retried with backoff.
    Transient,
    /// Authentication failures. Never retried; trigger model fallback.
    Auth,
    /// Budget exhaustion. Fails fast before any provider call.
    Budget,
    /// Test failures and schema mismatches. Non-fatal; feed the repair loop.
    Validation,
    /// Sandbox crashes, journal write failures, registry corruption.
    Infrastructure,
    /// Registry and routing errors.
    Registry,
    /// Workflow state machine errors.
    Workflow,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Contract => "contract",
            Self::Policy => "policy",
            Self::Transient => "transient",
            Self::Auth => "auth",
            Self::Budget => "budget",
            Self::Validation => "validation",
            Self::Infrastructure => "infrastructure",
            Self::Registry => "registry",
            Self::Workflow => "workflow",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Contract --
    /// Generator output was not parseable JSON.
    InvalidJson,
    /// A required contract field is absent.
    MissingField,
    /// A generated file path escapes the module root allowlist.
    DisallowedPath,
    /// Generated file content contains code-fence delimiters.
    FenceDetected,
    /// Generator output exceeds the file-count or byte-size cap.
    SizeExceeded,
    /// A manifest or payload failed strict schema validation.
    SchemaInvalid,
    /// On-disk files recompute to a different bundle hash than attested.
    BundleHashMismatch,
    /// An install was attempted without a usable attestation.
    AttestationInvalid,

    // -- Policy --
    /// Generated code imports a forbidden module.
    ForbiddenImport,
    /// Sandboxed code attempted a denied network operation.
    NetworkViolation,
    /// A sandbox resource cap (memory, processes) was exceeded.
    ResourceCapExceeded,
    /// A security gate blocked the attempt outright.
    SecurityBlock,

    // -- Transient --
    /// Provider returned a rate-limit response.
    RateLimited,
    /// Connection to the provider failed or was reset.
    ConnectionFailed,
    /// Provider returned a 5xx-class server error.
    ServerUnavailable,
    /// An operation exceeded its deadline.
    Timeout,

    // -- Auth --
    /// Provider rejected the credentials.
    AuthFailed,

    // -- Budget --
    /// A per-job or per-request token budget was exhausted.
    BudgetExceeded,

    // -- Validation --
    /// Module tests failed during validation.
    TestFailure,
    /// A required contract symbol is missing from the module.
    ContractSymbolMissing,

    // -- Infrastructure --
    /// The sandbox itself crashed (not the code under test).
    SandboxCrashed,
    /// A checkpoint could not be made durable.
    CheckpointWriteFailed,
    /// The registry index is corrupt or unreadable.
    RegistryCorrupt,

    // -- Registry --
    /// A `(module_id, version)` pair is already registered.
    DuplicateModule,
    /// The requested module is not registered.
    ModuleNotFound,
    /// The module's circuit breaker is open.
    CircuitOpen,
    /// No registered capability matches the query.
    NoCapabilityFound,

    // -- Workflow --
    /// The referenced conversation does not exist.
    ConversationNotFound,
    /// Every model preference in the lane failed.
    AllModelsFailed,
    /// The provider rejected the request as malformed.
    BadRequest,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidJson
            | Self::MissingField
            | Self::DisallowedPath
            | Self::FenceDetected
            | Self::SizeExceeded
            | Self::SchemaInvalid
            | Self::BundleHashMismatch
            | Self::AttestationInvalid
            | Self::BadRequest => ErrorCategory::Contract,

            Self::ForbiddenImport
            | Self::NetworkViolation
            | Self::ResourceCapExceeded
            | Self::SecurityBlock => ErrorCategory::Policy,

            Self::RateLimited | Self::ConnectionFailed | Self::ServerUnavailable | Self::Timeout => {
                ErrorCategory::Transient
            }

            Self::AuthFailed => ErrorCategory::Auth,

            Self::BudgetExceeded => ErrorCategory::Budget,

            Self::TestFailure | Self::ContractSymbolMissing => ErrorCategory::Validation,

            Self::SandboxCrashed | Self::CheckpointWriteFailed | Self::RegistryCorrupt => {
                ErrorCategory::Infrastructure
            }

            Self::DuplicateModule
            | Self::ModuleNotFound
            | Self::CircuitOpen
            | Self::NoCapabilityFound => ErrorCategory::Registry,

            Self::ConversationNotFound | Self::AllModelsFailed => ErrorCategory::Workflow,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Returns `true` when errors with this code may be retried with backoff.
    ///
    /// Only the transient I/O family qualifies; everything else either fails
    /// fast, falls back, or feeds the repair loop.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Returns `true` when this code terminates a repair loop immediately.
    #[must_use]
    pub fn is_terminal_for_repair(&self) -> bool {
        matches!(self, Self::ForbiddenImport | Self::SecurityBlock)
            || self.category() == ErrorCategory::Policy
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"FORBIDDEN_IMPORT"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidJson => "INVALID_JSON",
            Self::MissingField => "MISSING_FIELD",
            Self::DisallowedPath => "DISALLOWED_PATH",
            Self::FenceDetected => "FENCE_DETECTED",
            Self::SizeExceeded => "SIZE_EXCEEDED",
            Self::SchemaInvalid => "SCHEMA_INVALID",
            Self::BundleHashMismatch => "BUNDLE_HASH_MISMATCH",
            Self::AttestationInvalid => "ATTESTATION_INVALID",
            Self::ForbiddenImport => "FORBIDDEN_IMPORT",
            Self::NetworkViolation => "NETWORK_VIOLATION",
            Self::ResourceCapExceeded => "RESOURCE_CAP_EXCEEDED",
            Self::SecurityBlock => "SECURITY_BLOCK",
            Self::RateLimited => "RATE_LIMITED",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::ServerUnavailable => "SERVER_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::AuthFailed => "AUTH_FAILED",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::TestFailure => "TEST_FAILURE",
            Self::ContractSymbolMissing => "CONTRACT_SYMBOL_MISSING",
            Self::SandboxCrashed => "SANDBOX_CRASHED",
            Self::CheckpointWriteFailed => "CHECKPOINT_WRITE_FAILED",
            Self::RegistryCorrupt => "REGISTRY_CORRUPT",
            Self::DuplicateModule => "DUPLICATE_MODULE",
            Self::ModuleNotFound => "MODULE_NOT_FOUND",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::NoCapabilityFound => "NO_CAPABILITY_FOUND",
            Self::ConversationNotFound => "CONVERSATION_NOT_FOUND",
            Self::AllModelsFailed => "ALL_MODELS_FAILED",
            Self::BadRequest => "BAD_REQUEST",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ForgeError
// ---------------------------------------------------------------------------

/// Unified Agent Forge error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use agf_error::{ErrorCode, ForgeError};
///
/// let err = ForgeError::new(ErrorCode::RateLimited, "429 from provider")
///     .with_context("provider", "anthropic")
///     .with_context("retry_after_ms", 1_500);
/// assert!(err.code.is_transient());
/// ```
pub struct ForgeError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl ForgeError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for ForgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ForgeError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for ForgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ForgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`ForgeError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForgeErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&ForgeError> for ForgeErrorDto {
    fn from(err: &ForgeError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<ForgeErrorDto> for ForgeError {
    fn from(dto: ForgeErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
