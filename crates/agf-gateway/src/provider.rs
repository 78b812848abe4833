// SPDX-License-Identifier: MIT OR Apache-2.0
//! Provider contract and error taxonomy.
//!
//! A provider exposes `generate` plus a health probe; the gateway only
//! requires an error taxonomy mappable to
//! `{AUTH, RATE_LIMIT, CONNECTION, SERVER, BAD_REQUEST, SCHEMA_INVALID}`.

use crate::Purpose;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

/// A single generation request handed to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Routing lane (providers may tune decoding by purpose).
    pub purpose: Purpose,
    /// Model name from the selected preference.
    pub model: String,
    /// Prompt text.
    pub prompt: String,
    /// Optional system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Sampling seed, when the preference pins one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Build job this call belongs to (budget key).
    pub job_id: String,
    /// Tenant scope.
    pub org_id: String,
    /// End-to-end correlation id.
    pub correlation_id: Uuid,
}

/// Normalized token usage reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

impl Usage {
    /// Combined prompt + completion tokens.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A successful provider response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Generated text.
    pub text: String,
    /// Token usage.
    pub usage: Usage,
    /// Provider-reported finish reason (`stop`, `length`, ...).
    pub finish_reason: String,
}

/// Provider error classes the gateway understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderErrorKind {
    /// Credentials rejected. Never retried; triggers fallback.
    Auth,
    /// Rate limited, with an optional retry-after hint.
    RateLimit {
        /// Provider-supplied delay hint in milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
    },
    /// Connection failure or reset.
    Connection,
    /// 5xx-class server error.
    Server,
    /// The request itself was malformed. Never retried.
    BadRequest,
    /// The response violated the declared output contract. Never retried;
    /// the gateway moves to the next preference.
    SchemaInvalid,
}

impl ProviderErrorKind {
    /// Transient classes are retried with backoff; everything else is not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::Connection | Self::Server)
    }

    /// The stable cross-component [`ErrorCode`](agf_error::ErrorCode).
    #[must_use]
    pub fn error_code(&self) -> agf_error::ErrorCode {
        match self {
            Self::Auth => agf_error::ErrorCode::AuthFailed,
            Self::RateLimit { .. } => agf_error::ErrorCode::RateLimited,
            Self::Connection => agf_error::ErrorCode::ConnectionFailed,
            Self::Server => agf_error::ErrorCode::ServerUnavailable,
            Self::BadRequest => agf_error::ErrorCode::BadRequest,
            Self::SchemaInvalid => agf_error::ErrorCode::SchemaInvalid,
        }
    }

    /// Stable class name for attempt trails and logs.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            Self::Auth => "AUTH",
            Self::RateLimit { .. } => "RATE_LIMIT",
            Self::Connection => "CONNECTION",
            Self::Server => "SERVER",
            Self::BadRequest => "BAD_REQUEST",
            Self::SchemaInvalid => "SCHEMA_INVALID",
        }
    }
}

/// A classified provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{} from provider: {message}", kind.class())]
pub struct ProviderError {
    /// Error class.
    pub kind: ProviderErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl ProviderError {
    /// Construct an error with the given class and message.
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The contract every model provider implements.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Stable provider identifier (registry key).
    fn id(&self) -> &str;

    /// Generate a completion for `request`.
    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Liveness probe.
    async fn health(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// Test provider that returns a scripted sequence of results.
///
/// Deterministic by construction: the Nth call returns the Nth scripted
/// entry; once the script is exhausted every further call returns a
/// connection error.
pub struct ScriptedProvider {
    id: String,
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    fallback: Option<ProviderResponse>,
    calls: std::sync::atomic::AtomicU32,
}

impl ScriptedProvider {
    /// Create a provider that will replay `script` in order.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        script: Vec<Result<ProviderResponse, ProviderError>>,
    ) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(script.into()),
            fallback: None,
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Convenience: a provider that always succeeds with `text`.
    #[must_use]
    pub fn always(id: impl Into<String>, text: &str) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: Some(ok_response(text)),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Number of `generate` calls observed.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Build a plain success response around `text`.
#[must_use]
pub fn ok_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        text: text.to_string(),
        usage: Usage {
            input_tokens: 100,
            output_tokens: 50,
        },
        finish_reason: "stop".to_string(),
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, _request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let next = self.script.lock().expect("script lock poisoned").pop_front();
        match next {
            Some(result) => result,
            None => match &self.fallback {
                Some(response) => Ok(response.clone()),
                None => Err(ProviderError::new(
                    ProviderErrorKind::Connection,
                    "script exhausted",
                )),
            },
        }
    }
}
