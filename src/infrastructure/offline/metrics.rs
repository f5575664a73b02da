use crate::domain::entities::QueueRetryMetricsSnapshot;
use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryOutcome {
    Success,
    Retry,
    Quarantined,
}

impl RetryOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RetryOutcome::Success => "success",
            RetryOutcome::Retry => "retry",
            RetryOutcome::Quarantined => "quarantined",
        }
    }
}

/// Per-queue retry counters. Failures (retry or quarantine) bump
/// `consecutive_failure`; any success resets it.
#[derive(Default)]
pub struct QueueRetryMetrics {
    success: AtomicU64,
    failure: AtomicU64,
    retry: AtomicU64,
    quarantined: AtomicU64,
    consecutive_failure: AtomicU64,
    last_success_ms: AtomicI64,
    last_failure_ms: AtomicI64,
    last_outcome: Mutex<Option<RetryOutcome>>,
}

impl QueueRetryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: RetryOutcome, now_ms: i64) {
        match outcome {
            RetryOutcome::Success => {
                self.success.fetch_add(1, Ordering::Relaxed);
                self.last_success_ms.store(now_ms, Ordering::Relaxed);
                self.consecutive_failure.store(0, Ordering::Relaxed);
            }
            RetryOutcome::Retry | RetryOutcome::Quarantined => {
                self.failure.fetch_add(1, Ordering::Relaxed);
                self.last_failure_ms.store(now_ms, Ordering::Relaxed);
                self.consecutive_failure.fetch_add(1, Ordering::Relaxed);
                if outcome == RetryOutcome::Retry {
                    self.retry.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.quarantined.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if let Ok(mut guard) = self.last_outcome.lock() {
            *guard = Some(outcome);
        }
    }

    pub fn snapshot(&self) -> QueueRetryMetricsSnapshot {
        let last_outcome = self
            .last_outcome
            .lock()
            .map(|guard| *guard)
            .unwrap_or(None);

        QueueRetryMetricsSnapshot {
            total_success: self.success.load(Ordering::Relaxed),
            total_failure: self.failure.load(Ordering::Relaxed),
            total_retry: self.retry.load(Ordering::Relaxed),
            total_quarantined: self.quarantined.load(Ordering::Relaxed),
            consecutive_failure: self.consecutive_failure.load(Ordering::Relaxed),
            last_success_ms: to_option(self.last_success_ms.load(Ordering::Relaxed)),
            last_failure_ms: to_option(self.last_failure_ms.load(Ordering::Relaxed)),
            last_outcome: last_outcome.map(|outcome| outcome.as_str().to_string()),
        }
    }
}

fn to_option(value: i64) -> Option<i64> {
    if value == 0 { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_resets_consecutive_failures() {
        let metrics = QueueRetryMetrics::new();
        metrics.record(RetryOutcome::Retry, 10);
        metrics.record(RetryOutcome::Quarantined, 20);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_failure, 2);
        assert_eq!(snapshot.total_retry, 1);
        assert_eq!(snapshot.total_quarantined, 1);
        assert_eq!(snapshot.consecutive_failure, 2);
        assert_eq!(snapshot.last_failure_ms, Some(20));
        assert_eq!(snapshot.last_outcome.as_deref(), Some("quarantined"));

        metrics.record(RetryOutcome::Success, 30);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_success, 1);
        assert_eq!(snapshot.consecutive_failure, 0);
        assert_eq!(snapshot.last_success_ms, Some(30));
    }
}
