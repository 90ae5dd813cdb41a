//! Per-request quota accounting, evaluated at each checkpoint.

use std::time::{Duration, Instant};
use tracing::debug;

use quern_protocol::QueryStats;

use crate::config::QueryQuota;

/// Verdict of one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaVerdict {
    /// Both budgets hold; keep stepping.
    Continue,
    /// A budget is exhausted and nothing was produced yet.
    Timeout,
    /// A budget is exhausted after at least one unit of progress; the
    /// buffered prefix is the payload.
    Partial,
}

/// Tracks elapsed time and produced bytes for one request. The clock
/// starts at worker pickup, so queue wait does not consume budget; the
/// injected delay runs after pickup and does.
pub struct QuotaMonitor {
    quota: QueryQuota,
    started: Instant,
    bytes_used: u64,
    units_produced: u64,
}

impl QuotaMonitor {
    pub fn start(quota: QueryQuota) -> Self {
        Self {
            quota,
            started: Instant::now(),
            bytes_used: 0,
            units_produced: 0,
        }
    }

    /// Record one produced unit of progress (a row, a blob chunk).
    pub fn record_progress(&mut self, bytes: u64) {
        self.bytes_used += bytes;
        self.units_produced += 1;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn bytes_used(&self) -> u64 {
        self.bytes_used
    }

    pub fn checkpoint(&self) -> QuotaVerdict {
        let over_time = self.elapsed() > self.quota.time;
        let over_memory = self.bytes_used > self.quota.memory;
        if !over_time && !over_memory {
            return QuotaVerdict::Continue;
        }

        debug!(
            over_time,
            over_memory,
            units = self.units_produced,
            bytes = self.bytes_used,
            "quota exhausted"
        );
        if self.units_produced == 0 {
            QuotaVerdict::Timeout
        } else {
            QuotaVerdict::Partial
        }
    }

    pub fn stats(&self) -> QueryStats {
        QueryStats::new(self.elapsed(), self.bytes_used)
    }
}
