//! Failure policy resolution
//!
//! Every handler failure resolves to exactly one rule, keyed by the
//! pair of handler kind and failure kind. A rule optionally retries the
//! invocation with exponential backoff, then either halts the workflow
//! or continues it with fallback context values.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::FieldMap;

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total invocation attempts, including the first
    pub max_attempts: u32,
    /// Base backoff time in milliseconds
    pub backoff_base_ms: u64,
    /// Maximum backoff time in milliseconds
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 5000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base_ms: u64, backoff_max_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff_base_ms,
            backoff_max_ms,
        }
    }

    /// Backoff delay before the next attempt, given the number of
    /// failed attempts so far (1 after the first failure).
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let shift = failed_attempts.saturating_sub(1).min(10);
        let delay_ms = self.backoff_base_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay_ms.min(self.backoff_max_ms))
    }
}

/// What happens to the workflow once retries are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDisposition {
    /// Stop the workflow; skip all not-yet-started steps
    Halt,
    /// Record the failure, merge fallback values, keep going degraded
    Continue,
}

/// The resolved policy for one (handler kind, failure kind) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRule {
    pub disposition: FailureDisposition,
    /// Retry before applying the disposition, if set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Context values merged when the disposition is Continue
    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    pub fallback: FieldMap,
}

impl FailureRule {
    /// Stop the workflow on this failure
    pub fn halt() -> Self {
        Self {
            disposition: FailureDisposition::Halt,
            retry: None,
            fallback: FieldMap::new(),
        }
    }

    /// Continue the workflow, merging the given fallback values
    pub fn continue_with(fallback: FieldMap) -> Self {
        Self {
            disposition: FailureDisposition::Continue,
            retry: None,
            fallback,
        }
    }

    /// Retry before applying the disposition
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Total attempts this rule allows (1 when there is no retry)
    pub fn max_attempts(&self) -> u32 {
        self.retry.map_or(1, |r| r.max_attempts.max(1))
    }
}

/// Lookup table from (handler kind, failure kind) to rule
///
/// Resolution precedence: exact pair, then the handler's default, then
/// the table default. The table default halts; an unconfigured failure
/// can never be dropped silently.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    rules: HashMap<String, HashMap<String, FailureRule>>,
    handler_defaults: HashMap<String, FailureRule>,
    table_default: FailureRule,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyTable {
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
            handler_defaults: HashMap::new(),
            table_default: FailureRule::halt(),
        }
    }

    /// Set the rule for an exact (handler kind, failure kind) pair
    pub fn rule(
        mut self,
        handler: impl Into<String>,
        failure_kind: impl Into<String>,
        rule: FailureRule,
    ) -> Self {
        self.rules
            .entry(handler.into())
            .or_default()
            .insert(failure_kind.into(), rule);
        self
    }

    /// Set the default rule for every failure kind of one handler
    pub fn handler_default(mut self, handler: impl Into<String>, rule: FailureRule) -> Self {
        self.handler_defaults.insert(handler.into(), rule);
        self
    }

    /// Replace the table default (halt unless overridden)
    pub fn table_default(mut self, rule: FailureRule) -> Self {
        self.table_default = rule;
        self
    }

    /// Resolve the rule for a concrete failure
    pub fn resolve(&self, handler: &str, failure_kind: &str) -> &FailureRule {
        if let Some(by_kind) = self.rules.get(handler) {
            if let Some(rule) = by_kind.get(failure_kind) {
                return rule;
            }
        }
        self.handler_defaults
            .get(handler)
            .unwrap_or(&self.table_default)
    }
}
