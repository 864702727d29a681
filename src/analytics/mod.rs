use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::ErrorCode;

/// Per-gateway call counters. Relaxed ordering; the snapshot is advisory.
#[derive(Debug, Default)]
pub struct GatewayStats {
    calls: AtomicU64,
    succeeded: AtomicU64,
    rate_limited: AtomicU64,
    not_found: AtomicU64,
    validation_failed: AtomicU64,
    execution_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub calls: u64,
    pub succeeded: u64,
    pub rate_limited: u64,
    pub not_found: u64,
    pub validation_failed: u64,
    pub execution_errors: u64,
}

impl GatewayStats {
    pub fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, code: ErrorCode) {
        let counter = match code {
            ErrorCode::RateLimitExceeded => &self.rate_limited,
            ErrorCode::ToolNotFound => &self.not_found,
            ErrorCode::ValidationFailed => &self.validation_failed,
            ErrorCode::ExecutionError => &self.execution_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            validation_failed: self.validation_failed.load(Ordering::Relaxed),
            execution_errors: self.execution_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_outcomes_by_code() {
        let stats = GatewayStats::default();
        stats.record_call();
        stats.record_call();
        stats.record_call();
        stats.record_success();
        stats.record_failure(ErrorCode::RateLimitExceeded);
        stats.record_failure(ErrorCode::ValidationFailed);

        let snap = stats.snapshot();
        assert_eq!(snap.calls, 3);
        assert_eq!(snap.succeeded, 1);
        assert_eq!(snap.rate_limited, 1);
        assert_eq!(snap.validation_failed, 1);
        assert_eq!(snap.not_found, 0);
        assert_eq!(snap.execution_errors, 0);
    }
}
