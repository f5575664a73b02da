use crate::domain::value_objects::{MutationType, Payload, QueueItemId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One durable pending remote mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub mutation_type: MutationType,
    pub target_id: String,
    pub payload: Payload,
    pub retries: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub next_retry: i64,
    pub priority: i64,
    pub quarantined: bool,
}

impl QueueItem {
    pub fn new(
        mutation_type: MutationType,
        target_id: String,
        payload: Payload,
        priority: i64,
        now_ms: i64,
    ) -> Self {
        Self {
            id: QueueItemId::generate(),
            mutation_type,
            target_id,
            payload,
            retries: 0,
            last_error: None,
            created_at: now_ms,
            next_retry: now_ms,
            priority,
            quarantined: false,
        }
    }

    pub fn is_ready(&self, now_ms: i64) -> bool {
        !self.quarantined && self.next_retry <= now_ms
    }

    /// Ordering key within a processing cycle.
    pub fn schedule_key(&self) -> (i64, i64) {
        (self.priority, self.created_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItemSummary {
    pub id: QueueItemId,
    pub mutation_type: String,
    pub target_id: String,
    pub retries: u32,
    pub created_at: i64,
}

impl From<&QueueItem> for QueueItemSummary {
    fn from(item: &QueueItem) -> Self {
        Self {
            id: item.id.clone(),
            mutation_type: item.mutation_type.as_str().to_string(),
            target_id: item.target_id.clone(),
            retries: item.retries,
            created_at: item.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueRetryMetricsSnapshot {
    pub total_success: u64,
    pub total_failure: u64,
    pub total_retry: u64,
    pub total_quarantined: u64,
    pub consecutive_failure: u64,
    pub last_success_ms: Option<i64>,
    pub last_failure_ms: Option<i64>,
    pub last_outcome: Option<String>,
}

/// Observability view over the queue. Never used for control flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueStats {
    pub total: u64,
    pub total_including_quarantined: u64,
    pub quarantined: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_retries: BTreeMap<u32, u64>,
    pub oldest: Option<QueueItemSummary>,
    pub newest: Option<QueueItemSummary>,
    pub metrics: QueueRetryMetricsSnapshot,
}

impl QueueStats {
    pub fn from_items(items: &[QueueItem], metrics: QueueRetryMetricsSnapshot) -> Self {
        let mut stats = QueueStats {
            total_including_quarantined: items.len() as u64,
            metrics,
            ..Default::default()
        };

        let active: Vec<&QueueItem> = items.iter().filter(|item| !item.quarantined).collect();
        stats.total = active.len() as u64;
        stats.quarantined = stats.total_including_quarantined - stats.total;

        for item in &active {
            *stats
                .by_type
                .entry(item.mutation_type.as_str().to_string())
                .or_insert(0) += 1;
            *stats.by_retries.entry(item.retries).or_insert(0) += 1;
        }

        stats.oldest = active
            .iter()
            .min_by_key(|item| item.created_at)
            .map(|item| QueueItemSummary::from(*item));
        stats.newest = active
            .iter()
            .max_by_key(|item| item.created_at)
            .map(|item| QueueItemSummary::from(*item));
        stats
    }
}
