// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded retry with jittered exponential backoff.
//!
//! Delay formula: `min(base · 2^attempt, cap) + uniform(0, jitter · delay)`.
//! When the provider supplies a retry-after hint, the hint replaces the
//! computed delay entirely. Permanent error classes never retry.

use crate::provider::{ProviderError, ProviderResponse};
use agf_cancel::CancellationToken;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Retry knobs, usually sourced from `agf-config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum total attempts (first try included).
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Delay cap.
    pub cap: Duration,
    /// Jitter fraction in `[0.0, 1.0]`.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter_fraction: 0.5,
        }
    }
}

/// Record of a single failed attempt, kept for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// Zero-indexed attempt number.
    pub attempt: u32,
    /// Error class from this attempt.
    pub error_class: String,
    /// Error message from this attempt.
    pub error: String,
    /// Backoff delay applied before the next attempt.
    pub delay_ms: u64,
}

/// Outcome of a retry-enabled provider call.
#[derive(Debug)]
pub struct RetryOutcome {
    /// The successful response.
    pub response: ProviderResponse,
    /// Total attempts made (including the successful one).
    pub total_attempts: u32,
    /// Records of each failed attempt.
    pub failed_attempts: Vec<RetryAttempt>,
    /// Wall-clock time across all attempts.
    pub total_duration: Duration,
}

/// Why a retry loop stopped without success.
#[derive(Debug)]
pub enum RetryAbort {
    /// A permanent error class was returned; the caller moves on.
    Permanent(ProviderError),
    /// Transient errors persisted through the attempt budget.
    Exhausted(ProviderError),
    /// The cancellation token fired.
    Cancelled,
}

/// Compute the backoff delay for a zero-indexed `attempt`.
///
/// `retry_after` (from a rate-limit hint) overrides the computed delay.
#[must_use]
pub fn compute_delay(config: &RetryConfig, attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(hint) = retry_after {
        return hint.min(config.cap);
    }

    let exp = 2u64.saturating_pow(attempt);
    let delay_ms = (config.base_delay.as_millis() as u64).saturating_mul(exp);
    let capped_ms = delay_ms.min(config.cap.as_millis() as u64);

    let jitter_fraction = config.jitter_fraction.clamp(0.0, 1.0);
    if jitter_fraction > 0.0 && capped_ms > 0 {
        let jitter_range = (capped_ms as f64 * jitter_fraction) as u64;
        // Cheap pseudo-random: system-clock nanos mixed with the attempt index.
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        let pseudo = nanos.wrapping_mul(attempt as u64 + 1);
        let jitter = if jitter_range > 0 { pseudo % jitter_range } else { 0 };
        Duration::from_millis(capped_ms.saturating_add(jitter))
    } else {
        Duration::from_millis(capped_ms)
    }
}

/// Call `op` up to `config.max_attempts` times with backoff.
///
/// Transient error classes retry; permanent classes abort immediately.
/// Cancellation is checked before each attempt and during backoff sleeps.
pub async fn call_with_retry<F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<RetryOutcome, RetryAbort>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ProviderResponse, ProviderError>>,
{
    let start = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut failed_attempts = Vec::new();

    for attempt in 0..max_attempts {
        if cancel.is_cancelled() {
            return Err(RetryAbort::Cancelled);
        }

        debug!(target: "forge.gateway.retry", attempt, max_attempts, "attempting provider call");

        let result = tokio::select! {
            r = op() => r,
            () = cancel.cancelled() => return Err(RetryAbort::Cancelled),
        };

        match result {
            Ok(response) => {
                return Ok(RetryOutcome {
                    response,
                    total_attempts: attempt + 1,
                    failed_attempts,
                    total_duration: start.elapsed(),
                });
            }
            Err(err) => {
                if !err.kind.is_transient() {
                    debug!(
                        target: "forge.gateway.retry",
                        class = err.kind.class(),
                        "permanent error, no retry"
                    );
                    return Err(RetryAbort::Permanent(err));
                }

                let is_last = attempt + 1 >= max_attempts;
                if is_last {
                    warn!(
                        target: "forge.gateway.retry",
                        class = err.kind.class(),
                        attempt,
                        "retry budget exhausted"
                    );
                    return Err(RetryAbort::Exhausted(err));
                }

                let retry_after = match &err.kind {
                    crate::ProviderErrorKind::RateLimit { retry_after_ms } => {
                        retry_after_ms.map(Duration::from_millis)
                    }
                    _ => None,
                };
                let delay = compute_delay(config, attempt, retry_after);
                warn!(
                    target: "forge.gateway.retry",
                    class = err.kind.class(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient error, backing off"
                );
                failed_attempts.push(RetryAttempt {
                    attempt,
                    error_class: err.kind.class().to_string(),
                    error: err.message.clone(),
                    delay_ms: delay.as_millis() as u64,
                });

                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => return Err(RetryAbort::Cancelled),
                }
            }
        }
    }

    // max_attempts >= 1, so the loop always returns before reaching here.
    Err(RetryAbort::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderErrorKind, ok_response};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            jitter_fraction: 0.0,
        }
    }

    #[test]
    fn delay_grows_exponentially_then_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            cap: Duration::from_millis(350),
            jitter_fraction: 0.0,
        };
        assert_eq!(compute_delay(&config, 0, None), Duration::from_millis(100));
        assert_eq!(compute_delay(&config, 1, None), Duration::from_millis(200));
        assert_eq!(compute_delay(&config, 2, None), Duration::from_millis(350));
        assert_eq!(compute_delay(&config, 10, None), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_the_configured_fraction() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            cap: Duration::from_secs(30),
            jitter_fraction: 0.5,
        };
        for attempt in 0..4 {
            let nominal = 100u64 * 2u64.pow(attempt);
            let delay = compute_delay(&config, attempt, None).as_millis() as u64;
            assert!(delay >= nominal, "delay {delay} below nominal {nominal}");
            assert!(
                delay <= nominal + nominal / 2,
                "delay {delay} above nominal+jitter {}",
                nominal + nominal / 2
            );
        }
    }

    #[test]
    fn retry_after_hint_overrides_computed_delay() {
        let config = fast_config(5);
        let delay = compute_delay(&config, 3, Some(Duration::from_millis(4)));
        assert_eq!(delay, Duration::from_millis(4));
        // The hint is still capped.
        let capped = compute_delay(&config, 0, Some(Duration::from_secs(600)));
        assert_eq!(capped, config.cap);
    }

    #[tokio::test]
    async fn transient_errors_retry_until_success() {
        let calls = AtomicU32::new(0);
        let outcome = call_with_retry(&fast_config(5), &CancellationToken::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::new(ProviderErrorKind::Server, "boom"))
                } else {
                    Ok(ok_response("done"))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(outcome.total_attempts, 3);
        assert_eq!(outcome.failed_attempts.len(), 2);
        assert_eq!(outcome.response.text, "done");
    }

    #[tokio::test]
    async fn permanent_error_aborts_without_retry() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(&fast_config(5), &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::new(ProviderErrorKind::Auth, "bad key")) }
        })
        .await;
        assert!(matches!(result, Err(RetryAbort::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_the_last_error() {
        let result = call_with_retry(&fast_config(3), &CancellationToken::new(), || async {
            Err(ProviderError::new(ProviderErrorKind::Connection, "reset"))
        })
        .await;
        match result {
            Err(RetryAbort::Exhausted(err)) => assert_eq!(err.kind, ProviderErrorKind::Connection),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_in_flight_retries() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = call_with_retry(&fast_config(5), &cancel, || async {
            Ok(ok_response("unreachable"))
        })
        .await;
        assert!(matches!(result, Err(RetryAbort::Cancelled)));
    }
}
