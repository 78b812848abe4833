// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-job token budget accounting.
//!
//! Budgets are checked *before* any provider call; an exhausted budget fails
//! fast with no network traffic. Counters are per-process; a multi-process
//! deployment would implement [`BudgetStore`] against shared storage and the
//! accounting here stays unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Budget caps applied per build job. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BudgetLimits {
    /// Cap on total tokens (prompt + completion) across the whole job.
    pub per_job_tokens: Option<u64>,
    /// Cap on completion tokens for any single request.
    pub per_request_tokens: Option<u64>,
}

/// Outcome of a pre-call budget check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BudgetVerdict {
    /// The call may proceed.
    Ok,
    /// The job has spent its token budget.
    JobExhausted {
        /// Tokens spent so far.
        spent: u64,
        /// Configured cap.
        limit: u64,
    },
    /// The single request asks for more than the per-request cap.
    RequestTooLarge {
        /// Requested completion tokens.
        requested: u64,
        /// Configured cap.
        limit: u64,
    },
}

impl BudgetVerdict {
    /// Returns `true` for [`BudgetVerdict::Ok`].
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Abstraction over budget counter storage.
///
/// The in-process [`BudgetLedger`] is the only implementation here; a
/// multi-process deployment plugs shared storage behind the same two calls.
pub trait BudgetStore: Send + Sync {
    /// Tokens spent so far for `job_id`.
    fn spent(&self, job_id: &str) -> u64;
    /// Atomically add `tokens` to the spend for `job_id`.
    fn record(&self, job_id: &str, tokens: u64);
}

/// In-process, thread-safe budget ledger keyed by job id.
#[derive(Debug, Default)]
pub struct BudgetLedger {
    limits: BudgetLimits,
    spent: Mutex<BTreeMap<String, AtomicU64>>,
}

impl BudgetLedger {
    /// A ledger with the given caps.
    #[must_use]
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            spent: Mutex::new(BTreeMap::new()),
        }
    }

    /// An unlimited ledger (every check passes).
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(BudgetLimits::default())
    }

    /// The configured limits.
    #[must_use]
    pub fn limits(&self) -> BudgetLimits {
        self.limits
    }

    /// Pre-call check for a request asking for `requested_tokens` completion
    /// tokens under job `job_id`.
    #[must_use]
    pub fn check(&self, job_id: &str, requested_tokens: u64) -> BudgetVerdict {
        if let Some(limit) = self.limits.per_request_tokens
            && requested_tokens > limit
        {
            return BudgetVerdict::RequestTooLarge {
                requested: requested_tokens,
                limit,
            };
        }
        if let Some(limit) = self.limits.per_job_tokens {
            let spent = self.spent(job_id);
            if spent >= limit {
                return BudgetVerdict::JobExhausted { spent, limit };
            }
        }
        BudgetVerdict::Ok
    }
}

impl BudgetStore for BudgetLedger {
    fn spent(&self, job_id: &str) -> u64 {
        let map = self.spent.lock().expect("budget lock poisoned");
        map.get(job_id).map_or(0, |counter| counter.load(Relaxed))
    }

    fn record(&self, job_id: &str, tokens: u64) {
        let mut map = self.spent.lock().expect("budget lock poisoned");
        map.entry(job_id.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(tokens, Relaxed);
    }
}
