use crate::application::ports::{FallbackStore, LocalStore};
use crate::application::services::cache_snapshot_service::CacheSnapshotService;
use crate::application::services::draft_service::{DRAFT_MIRROR_KEY, DraftMirror};
use crate::domain::value_objects::{DraftStatus, KeyRange};
use crate::shared::clock::Clock;
use crate::shared::error::AppError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HousekeepingReport {
    pub cutoff_ms: i64,
    pub drafts_purged: u64,
    pub queue_items_purged: u64,
    pub draft_mirror_purged: bool,
    pub cache_snapshots_purged: u32,
}

/// Age-based cleanup across the local store and the fallback store.
pub struct HousekeepingJob {
    store: Arc<dyn LocalStore>,
    fallback: Arc<dyn FallbackStore>,
    clock: Arc<dyn Clock>,
    cache: Option<Arc<CacheSnapshotService>>,
    retention_ms: i64,
}

impl HousekeepingJob {
    pub fn new(
        store: Arc<dyn LocalStore>,
        fallback: Arc<dyn FallbackStore>,
        clock: Arc<dyn Clock>,
        cache: Option<Arc<CacheSnapshotService>>,
        retention_ms: i64,
    ) -> Self {
        Self {
            store,
            fallback,
            clock,
            cache,
            retention_ms,
        }
    }

    pub async fn run_once(&self) -> Result<HousekeepingReport, AppError> {
        let started = Instant::now();
        let result = self.execute_once().await;
        let duration_ms = started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;

        match &result {
            Ok(report) => tracing::info!(
                target: "offline::housekeeping",
                cutoff_ms = report.cutoff_ms,
                drafts_purged = report.drafts_purged,
                queue_items_purged = report.queue_items_purged,
                draft_mirror_purged = report.draft_mirror_purged,
                cache_snapshots_purged = report.cache_snapshots_purged,
                duration_ms,
                "housekeeping completed"
            ),
            Err(err) => tracing::warn!(
                target: "offline::housekeeping",
                error = %err,
                duration_ms,
                "housekeeping failed"
            ),
        }
        result
    }

    async fn execute_once(&self) -> Result<HousekeepingReport, AppError> {
        let cutoff_ms = self.clock.now_ms().saturating_sub(self.retention_ms);
        let mut report = HousekeepingReport {
            cutoff_ms,
            ..HousekeepingReport::default()
        };

        // Finalized drafts stay until their queue item has been applied.
        let stale_drafts = self
            .store
            .drafts_by_updated_at(KeyRange::upper_bound_exclusive(cutoff_ms))
            .await?;
        for draft in stale_drafts
            .iter()
            .filter(|draft| draft.status != DraftStatus::PendingSync)
        {
            if self.store.delete_draft(&draft.id).await? {
                tracing::debug!(
                    target: "offline::housekeeping",
                    draft_id = %draft.id,
                    status = %draft.status,
                    "stale draft purged"
                );
                report.drafts_purged += 1;
            }
        }

        let items = self.store.all_queue_items().await?;
        for item in items
            .iter()
            .filter(|item| item.quarantined && item.created_at < cutoff_ms)
        {
            if self.store.delete_queue_item(&item.id).await? {
                tracing::debug!(
                    target: "offline::housekeeping",
                    item_id = %item.id,
                    mutation_type = %item.mutation_type,
                    retries = item.retries,
                    "quarantined item purged"
                );
                report.queue_items_purged += 1;
            }
        }

        if let Some(raw) = self.fallback.get(DRAFT_MIRROR_KEY)? {
            let stale = DraftMirror::parse(&raw).map_or(true, |mirror| mirror.saved_at < cutoff_ms);
            if stale {
                self.fallback.remove(DRAFT_MIRROR_KEY)?;
                report.draft_mirror_purged = true;
            }
        }

        if let Some(cache) = &self.cache {
            report.cache_snapshots_purged = cache.purge_expired().await;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{DraftRecord, QueueItem};
    use crate::domain::value_objects::{DraftId, MutationType, OwnerId, Payload};
    use crate::infrastructure::fallback::QuotaKeyValueStore;
    use crate::infrastructure::offline::SqliteLocalStore;
    use crate::shared::clock::ManualClock;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;
    const T0: i64 = 1_700_000_000_000;

    fn draft(status: DraftStatus, updated_at: i64) -> DraftRecord {
        let mut draft = DraftRecord::new(
            DraftId::generate(),
            OwnerId::new("auditor-1".into()).unwrap(),
            Payload::new(json!({"answers": []})).unwrap(),
            updated_at,
        );
        draft.status = status;
        draft.auto_saved = status == DraftStatus::AutoSaved;
        draft
    }

    #[tokio::test]
    async fn purges_only_what_retention_allows() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = Arc::new(SqliteLocalStore::with_schema(pool).await.unwrap());
        let fallback = Arc::new(QuotaKeyValueStore::in_memory(1024 * 1024));
        let clock = Arc::new(ManualClock::new(T0 + 10 * DAY_MS));

        let old_autosave = draft(DraftStatus::AutoSaved, T0);
        let old_synced = draft(DraftStatus::Synced, T0);
        let old_pending = draft(DraftStatus::PendingSync, T0);
        let fresh = draft(DraftStatus::AutoSaved, T0 + 9 * DAY_MS);
        for d in [&old_autosave, &old_synced, &old_pending, &fresh] {
            store.put_draft(d).await.unwrap();
        }

        let mut quarantined = QueueItem::new(
            MutationType::CreateRecord,
            "draft_x".into(),
            Payload::new(json!({})).unwrap(),
            1,
            T0,
        );
        quarantined.quarantined = true;
        let active = QueueItem::new(
            MutationType::CreateRecord,
            "draft_y".into(),
            Payload::new(json!({})).unwrap(),
            1,
            T0,
        );
        store.put_queue_item(&quarantined).await.unwrap();
        store.put_queue_item(&active).await.unwrap();

        let mirror = DraftMirror {
            record: old_autosave.clone(),
            saved_at: T0,
            content_hash: old_autosave.payload.content_hash(),
        };
        fallback
            .set(DRAFT_MIRROR_KEY, &serde_json::to_string(&mirror).unwrap())
            .unwrap();

        let job = HousekeepingJob::new(store.clone(), fallback.clone(), clock, None, 7 * DAY_MS);
        let report = job.run_once().await.unwrap();

        assert_eq!(report.drafts_purged, 2);
        assert_eq!(report.queue_items_purged, 1);
        assert!(report.draft_mirror_purged);
        assert!(store.get_draft(&old_pending.id).await.unwrap().is_some());
        assert!(store.get_draft(&fresh.id).await.unwrap().is_some());
        assert!(store.get_draft(&old_autosave.id).await.unwrap().is_none());
        assert!(store.get_queue_item(&active.id).await.unwrap().is_some());
        assert!(fallback.get(DRAFT_MIRROR_KEY).unwrap().is_none());

        let again = job.run_once().await.unwrap();
        assert_eq!(again.drafts_purged, 0);
        assert_eq!(again.queue_items_purged, 0);
    }
}
