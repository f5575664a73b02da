use crate::shared::config::SyncConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay_ms: i64 },
    Quarantine,
}

/// Backoff schedule and quarantine rule applied after a failed attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    schedule_ms: Vec<i64>,
    quarantine_permanent: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, schedule_ms: Vec<i64>, quarantine_permanent: bool) -> Self {
        Self {
            max_retries: max_retries.max(1),
            schedule_ms,
            quarantine_permanent,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        let schedule = config
            .backoff_schedule()
            .into_iter()
            .map(|delay| i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
            .collect();
        Self::new(
            config.max_retries,
            schedule,
            config.quarantine_permanent_errors,
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `retries` is the count after incrementing for the failure being handled.
    pub fn decide(&self, retries: u32, permanent: bool) -> RetryDecision {
        if retries >= self.max_retries || (permanent && self.quarantine_permanent) {
            return RetryDecision::Quarantine;
        }
        RetryDecision::Retry {
            delay_ms: self.delay_for(retries),
        }
    }

    fn delay_for(&self, retries: u32) -> i64 {
        if self.schedule_ms.is_empty() {
            return 0;
        }
        let index = (retries.saturating_sub(1) as usize).min(self.schedule_ms.len() - 1);
        self.schedule_ms[index]
    }

    pub fn is_exhausted(&self, retries: u32) -> bool {
        retries >= self.max_retries
    }
}
