//! Tunable tolerances for correlation.
//!
//! Every time window and heuristic threshold the engine uses lives here so it
//! can be overridden from configuration or tightened in tests.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::number::DEFAULT_MATCH_SUFFIX_LEN;

/// Configuration for the correlation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Idle transitions this soon after a call ended are OS duplicates.
    /// Default: 2000.
    pub cooldown_ms: i64,

    /// Wait before the first call-record query so the store can persist
    /// the call that just ended. Default: 800.
    pub settle_delay_ms: u64,

    /// Delay between call-record queries that came back empty. Default: 900.
    pub retry_delay_ms: u64,

    /// Additional queries after the first one. Default: 5.
    pub max_retries: u32,

    /// How long an outgoing marker stays valid, and the tolerance between a
    /// marker and a call-record timestamp. Default: 10000.
    pub marker_window_ms: i64,

    /// Lifetime of the per-number finalization lock. Default: 15000.
    pub final_lock_ttl_ms: i64,

    /// Two finals for one number closer than this (with same or unknown
    /// duration) are treated as one call. Default: 2000.
    pub duplicate_window_ms: i64,

    /// Maximum rows fetched per call-record query. Default: 20.
    pub query_limit: usize,

    /// How far back a call-record query looks. Default: 300000 (5 minutes).
    pub query_lookback_ms: i64,

    /// Trailing digits compared when fuzzily matching numbers. Default: 7.
    pub match_suffix_len: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 2_000,
            settle_delay_ms: 800,
            retry_delay_ms: 900,
            max_retries: 5,
            marker_window_ms: 10_000,
            final_lock_ttl_ms: 15_000,
            duplicate_window_ms: 2_000,
            query_limit: 20,
            query_lookback_ms: 300_000, // 5 minutes
            match_suffix_len: DEFAULT_MATCH_SUFFIX_LEN,
        }
    }
}

impl CorrelationConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::milliseconds(self.cooldown_ms)
    }

    pub fn marker_window(&self) -> Duration {
        Duration::milliseconds(self.marker_window_ms)
    }

    pub fn final_lock_ttl(&self) -> Duration {
        Duration::milliseconds(self.final_lock_ttl_ms)
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::milliseconds(self.duplicate_window_ms)
    }

    pub fn query_lookback(&self) -> Duration {
        Duration::milliseconds(self.query_lookback_ms)
    }

    pub const fn settle_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.settle_delay_ms)
    }

    pub const fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_delay_ms)
    }

    /// Worst-case time from a call ending to its final event being decided.
    pub fn max_reconcile_time(&self) -> std::time::Duration {
        self.settle_delay() + self.retry_delay() * self.max_retries
    }
}
