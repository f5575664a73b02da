use super::*;
use crate::application::ports::NoCredentials;
use crate::infrastructure::fallback::QuotaKeyValueStore;
use crate::infrastructure::offline::{SqliteLocalStore, SqliteStorageEstimator};
use crate::shared::clock::ManualClock;
use crate::shared::config::SyncConfig;
use async_trait::async_trait;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::AtomicU32;

const T0: i64 = 1_700_000_000_000;
const MB: u64 = 1024 * 1024;

#[derive(Default)]
struct CountingMirror {
    calls: AtomicU32,
}

#[async_trait]
impl RemoteDraftMirror for CountingMirror {
    async fn mirror_draft(
        &self,
        _draft: &DraftRecord,
        _credential: Option<&str>,
    ) -> Result<(), AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Fixture {
    store: Arc<SqliteLocalStore>,
    fallback: Arc<QuotaKeyValueStore>,
    queue: Arc<SyncQueue>,
    clock: Arc<ManualClock>,
    online: watch::Sender<ConnectivityState>,
    mirror: Arc<CountingMirror>,
    service: DraftService,
}

async fn fixture_with(fallback_quota: u64, config: DraftServiceConfig) -> Fixture {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("pool");
    let store = Arc::new(SqliteLocalStore::with_schema(pool).await.expect("schema"));
    let fallback = Arc::new(QuotaKeyValueStore::in_memory(fallback_quota));
    let clock = Arc::new(ManualClock::new(T0));
    let queue = Arc::new(SyncQueue::new(store.clone(), clock.clone(), &SyncConfig::default()));
    let (online, connectivity) = watch::channel(ConnectivityState::offline());
    let mirror = Arc::new(CountingMirror::default());

    let service = DraftService::new(
        DraftServiceDeps {
            store: store.clone(),
            fallback: fallback.clone(),
            queue: queue.clone(),
            clock: clock.clone(),
            connectivity,
            remote_mirror: Some(mirror.clone()),
            credentials: Arc::new(NoCredentials),
            estimator: Arc::new(SqliteStorageEstimator::new(store.clone(), 3 * 1024 * MB)),
        },
        config,
    );

    Fixture {
        store,
        fallback,
        queue,
        clock,
        online,
        mirror,
        service,
    }
}

async fn fixture() -> Fixture {
    fixture_with(5 * MB, DraftServiceConfig::default()).await
}

fn owner() -> OwnerId {
    OwnerId::new("auditor-1".into()).unwrap()
}

fn answers(n: u32) -> Payload {
    Payload::new(json!({ "title": "Kitchen audit", "answers": (0..n).collect::<Vec<_>>() })).unwrap()
}

fn saved(outcome: SaveDraftOutcome) -> SaveReport {
    match outcome {
        SaveDraftOutcome::Saved(report) => report,
        SaveDraftOutcome::AlreadySaving => panic!("save was dropped"),
    }
}

fn set_online(f: &Fixture, is_online: bool) {
    f.online.send_modify(|state| state.is_online = is_online);
}

#[tokio::test]
async fn autosaves_never_reach_the_queue() {
    let f = fixture().await;
    let first = saved(
        f.service
            .save_draft(&owner(), DraftInput::new(None, answers(1)))
            .await
            .unwrap(),
    );
    for n in 2..5 {
        f.clock.advance_secs(30);
        let report = saved(
            f.service
                .save_draft(&owner(), DraftInput::new(Some(first.draft_id.clone()), answers(n)))
                .await
                .unwrap(),
        );
        assert_eq!(report.status, DraftStatus::AutoSaved);
        assert!(report.queue_item.is_none());
    }

    assert_eq!(f.queue.get_stats().await.unwrap().total_including_quarantined, 0);
    let stored = f.store.get_draft(&first.draft_id).await.unwrap().unwrap();
    assert!(stored.auto_saved);
    assert_eq!(stored.payload, answers(4));
    assert!(f.fallback.get(DRAFT_MIRROR_KEY).unwrap().is_some());
}

#[tokio::test]
async fn finalize_enqueues_and_clears_mirror() {
    let f = fixture().await;
    let draft = saved(
        f.service
            .save_draft(&owner(), DraftInput::new(None, answers(2)))
            .await
            .unwrap(),
    );

    let report = saved(
        f.service
            .save_draft(
                &owner(),
                DraftInput::new(Some(draft.draft_id.clone()), answers(3)).finalized(),
            )
            .await
            .unwrap(),
    );

    assert_eq!(report.status, DraftStatus::PendingSync);
    let item_id = report.queue_item.expect("queued");
    let item = f.store.get_queue_item(&item_id).await.unwrap().unwrap();
    assert_eq!(item.mutation_type, MutationType::CreateRecord);
    assert_eq!(item.target_id, draft.draft_id.to_string());
    assert_eq!(item.priority, 1);
    assert_eq!(item.payload.as_json()["record"]["status"], "pending_sync");

    let stored = f.store.get_draft(&draft.draft_id).await.unwrap().unwrap();
    assert!(!stored.auto_saved);
    assert!(stored.is_consistent());
    assert!(f.fallback.get(DRAFT_MIRROR_KEY).unwrap().is_none());

    let again = f
        .service
        .save_draft(&owner(), DraftInput::new(Some(draft.draft_id), answers(4)))
        .await;
    assert!(matches!(again, Err(AppError::ValidationError(_))));
}

#[tokio::test]
async fn restore_prefers_local_store_with_real_blobs() {
    let f = fixture().await;
    let report = saved(
        f.service
            .save_draft(
                &owner(),
                DraftInput::new(None, answers(3)).with_attachments(vec![AttachmentInput::captured(
                    0,
                    1,
                    vec![0xFF, 0xD8, 0xFF],
                    "image/jpeg",
                    "sink.jpg",
                )]),
            )
            .await
            .unwrap(),
    );
    assert_eq!(report.tier("fallback"), Some(&TierOutcome::Written));

    let restored = f.service.restore_draft(&owner()).await.expect("restored");
    assert_eq!(restored.source, DraftSource::Durable);
    assert_eq!(restored.record.id, report.draft_id);
    assert_eq!(restored.attachments.len(), 1);
    assert_eq!(restored.attachments[0].data, vec![0xFF, 0xD8, 0xFF]);
    assert!(restored.unresolved.is_empty());
}

#[tokio::test]
async fn restore_uses_mirror_and_rehydrates_blobs() {
    let f = fixture().await;
    let report = saved(
        f.service
            .save_draft(
                &owner(),
                DraftInput::new(None, answers(3)).with_attachments(vec![AttachmentInput::captured(
                    1,
                    0,
                    vec![1, 2, 3],
                    "image/png",
                    "meter.png",
                )]),
            )
            .await
            .unwrap(),
    );

    // Draft row gone, blob still present.
    sqlx::query("DELETE FROM drafts")
        .execute(f.store.pool())
        .await
        .unwrap();

    let restored = f.service.restore_draft(&owner()).await.expect("restored");
    assert_eq!(restored.source, DraftSource::Fallback);
    assert_eq!(restored.record.id, report.draft_id);
    assert_eq!(restored.attachments.len(), 1);
    assert_eq!(restored.attachments[0].data, vec![1, 2, 3]);
    assert!(restored.record.attachments[0].mime.is_none());
}

#[tokio::test]
async fn unavailable_store_degrades_to_fallback_mirror() {
    let f = fixture().await;
    f.store.pool().close().await;

    let report = saved(
        f.service
            .save_draft(
                &owner(),
                DraftInput::new(None, answers(2)).with_attachments(vec![AttachmentInput::captured(
                    0,
                    0,
                    vec![9; 16],
                    "image/png",
                    "a.png",
                )]),
            )
            .await
            .unwrap(),
    );
    assert!(report.degraded());
    assert_eq!(report.tier("fallback"), Some(&TierOutcome::Written));

    let restored = f.service.restore_draft(&owner()).await.expect("restored");
    assert_eq!(restored.source, DraftSource::Fallback);
    assert!(restored.attachments.is_empty());
    assert_eq!(restored.unresolved.len(), 1);

    let finalize = f
        .service
        .save_draft(&owner(), DraftInput::new(Some(report.draft_id), answers(3)).finalized())
        .await;
    assert!(finalize.is_err());
}

#[tokio::test]
async fn large_draft_with_full_fallback_quota_still_saves_locally() {
    let f = fixture_with(10 * MB, DraftServiceConfig::default()).await;
    let rows: Vec<String> = (0..10_500).map(|i| format!("{i:0>1000}")).collect();
    let payload = Payload::new(json!({ "title": "Plant survey", "rows": rows })).unwrap();
    assert!(payload.byte_len() as u64 > 10 * MB);

    let report = saved(
        f.service
            .save_draft(&owner(), DraftInput::new(None, payload.clone()))
            .await
            .unwrap(),
    );

    assert_eq!(report.tier("durable"), Some(&TierOutcome::Written));
    assert_eq!(report.tier("fallback"), Some(&TierOutcome::Reduced));
    let stored = f.store.get_draft(&report.draft_id).await.unwrap().unwrap();
    assert_eq!(stored.payload, payload);

    let mirror = DraftMirror::parse(&f.fallback.get(DRAFT_MIRROR_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(mirror.record.payload.as_json()["rows"], json!([]));
    assert_eq!(mirror.content_hash, payload.content_hash());
}

#[tokio::test]
async fn unreducible_draft_drops_mirror_without_failing() {
    let f = fixture_with(MB, DraftServiceConfig::default()).await;
    let payload = Payload::new(json!({ "notes": "x".repeat(2 * MB as usize) })).unwrap();

    let report = saved(
        f.service
            .save_draft(&owner(), DraftInput::new(None, payload))
            .await
            .unwrap(),
    );

    assert_eq!(report.tier("durable"), Some(&TierOutcome::Written));
    assert!(matches!(report.tier("fallback"), Some(TierOutcome::Failed(_))));
    assert!(!report.degraded());
}

#[tokio::test]
async fn overlapping_save_is_dropped() {
    let f = fixture().await;
    let owner = owner();
    let (a, b) = tokio::join!(
        f.service.save_draft(&owner, DraftInput::new(None, answers(1))),
        f.service.save_draft(&owner, DraftInput::new(None, answers(2))),
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let dropped = outcomes
        .iter()
        .filter(|o| matches!(o, SaveDraftOutcome::AlreadySaving))
        .count();
    assert_eq!(dropped, 1);

    // The guard is released afterwards.
    let next = f
        .service
        .save_draft(&owner, DraftInput::new(None, answers(3)))
        .await
        .unwrap();
    assert!(matches!(next, SaveDraftOutcome::Saved(_)));
}

#[tokio::test]
async fn remote_mirror_only_runs_online() {
    let f = fixture().await;
    let offline = saved(
        f.service
            .save_draft(&owner(), DraftInput::new(None, answers(1)))
            .await
            .unwrap(),
    );
    assert!(matches!(offline.tier("remote"), Some(TierOutcome::Skipped(_))));
    assert_eq!(f.mirror.calls.load(Ordering::SeqCst), 0);

    set_online(&f, true);
    let online = saved(
        f.service
            .save_draft(&owner(), DraftInput::new(Some(offline.draft_id), answers(2)))
            .await
            .unwrap(),
    );
    assert_eq!(online.tier("remote"), Some(&TierOutcome::Written));
    assert_eq!(f.mirror.calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.queue.get_stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn recaptured_slot_replaces_blob() {
    let f = fixture().await;
    let first = saved(
        f.service
            .save_draft(
                &owner(),
                DraftInput::new(None, answers(1)).with_attachments(vec![
                    AttachmentInput::captured(0, 0, vec![1], "image/png", "old.png"),
                    AttachmentInput::captured(0, 1, vec![2], "image/png", "keep.png"),
                ]),
            )
            .await
            .unwrap(),
    );
    let blobs = f.store.attachments_for_draft(&first.draft_id).await.unwrap();
    let kept = blobs.iter().find(|b| b.item_index == 1).unwrap().id.clone();

    let second = saved(
        f.service
            .save_draft(
                &owner(),
                DraftInput::new(Some(first.draft_id.clone()), answers(1)).with_attachments(vec![
                    AttachmentInput::captured(0, 0, vec![3], "image/png", "new.png"),
                    AttachmentInput::existing(0, 1, kept.clone()),
                ]),
            )
            .await
            .unwrap(),
    );
    assert_eq!(second.stored_attachments, 1);
    assert_eq!(second.removed_attachments, 1);

    let blobs = f.store.attachments_for_draft(&first.draft_id).await.unwrap();
    assert_eq!(blobs.len(), 2);
    assert!(blobs.iter().any(|b| b.id == kept));
    assert!(blobs.iter().any(|b| b.data == vec![3]));
}

#[tokio::test]
async fn moved_blob_survives_recapture_of_its_old_slot() {
    let f = fixture().await;
    let first = saved(
        f.service
            .save_draft(
                &owner(),
                DraftInput::new(None, answers(1)).with_attachments(vec![AttachmentInput::captured(
                    0,
                    0,
                    vec![1],
                    "image/png",
                    "meter.png",
                )]),
            )
            .await
            .unwrap(),
    );
    let moved = f.store.attachments_for_draft(&first.draft_id).await.unwrap()[0].id.clone();

    let second = saved(
        f.service
            .save_draft(
                &owner(),
                DraftInput::new(Some(first.draft_id.clone()), answers(1)).with_attachments(vec![
                    AttachmentInput::existing(1, 1, moved.clone()),
                    AttachmentInput::captured(0, 0, vec![2], "image/png", "retake.png"),
                ]),
            )
            .await
            .unwrap(),
    );
    assert_eq!(second.removed_attachments, 0);

    let blobs = f.store.attachments_for_draft(&first.draft_id).await.unwrap();
    assert_eq!(blobs.len(), 2);
    let kept = blobs.iter().find(|b| b.id == moved).expect("moved blob kept");
    assert_eq!((kept.section_index, kept.item_index), (1, 1));

    let restored = f.service.restore_draft(&owner()).await.expect("restored");
    assert!(restored.unresolved.is_empty());
    assert_eq!(restored.attachments.len(), 2);
}

#[tokio::test]
async fn save_over_another_owners_draft_is_rejected() {
    let f = fixture().await;
    let draft = saved(
        f.service
            .save_draft(&owner(), DraftInput::new(None, answers(1)))
            .await
            .unwrap(),
    );
    let intruder = OwnerId::new("auditor-2".into()).unwrap();
    let result = f
        .service
        .save_draft(&intruder, DraftInput::new(Some(draft.draft_id), answers(2)))
        .await;
    assert!(matches!(result, Err(AppError::ValidationError(_))));
    assert!(f.service.restore_draft(&intruder).await.is_none());
}

#[tokio::test]
async fn change_detection_and_recent_autosave() {
    let f = fixture().await;
    let draft = saved(
        f.service
            .save_draft(&owner(), DraftInput::new(None, answers(2)))
            .await
            .unwrap(),
    );

    assert!(!f.service.has_unsaved_changes(&draft.draft_id, &answers(2)).await);
    assert!(f.service.has_unsaved_changes(&draft.draft_id, &answers(3)).await);
    assert!(f.service.has_recent_autosave(&owner()).await);

    let info = f.service.last_save_info().expect("mirror present");
    assert_eq!(info.draft_id, draft.draft_id);
    assert_eq!(info.status, DraftStatus::AutoSaved);

    f.clock.advance_secs(25 * 3600);
    assert!(!f.service.has_recent_autosave(&owner()).await);
}

#[tokio::test]
async fn discard_removes_every_tier() {
    let f = fixture().await;
    let draft = saved(
        f.service
            .save_draft(
                &owner(),
                DraftInput::new(None, answers(1)).with_attachments(vec![AttachmentInput::captured(
                    0,
                    0,
                    vec![7],
                    "image/png",
                    "x.png",
                )]),
            )
            .await
            .unwrap(),
    );

    assert!(f.service.discard_draft(&owner(), &draft.draft_id).await.unwrap());
    assert!(f.store.get_draft(&draft.draft_id).await.unwrap().is_none());
    assert!(f.store.attachments_for_draft(&draft.draft_id).await.unwrap().is_empty());
    assert!(f.fallback.get(DRAFT_MIRROR_KEY).unwrap().is_none());
    assert!(f.service.restore_draft(&owner()).await.is_none());
}

#[tokio::test]
async fn storage_limit_counts_unsynced_drafts() {
    let config = DraftServiceConfig {
        max_pending_drafts: 2,
        ..DraftServiceConfig::default()
    };
    let f = fixture_with(5 * MB, config).await;

    saved(f.service.save_draft(&owner(), DraftInput::new(None, answers(1))).await.unwrap());
    let status = f.service.check_storage_limit().await.unwrap();
    assert_eq!(status.pending_drafts, 1);
    assert!(status.within_limit);

    saved(f.service.save_draft(&owner(), DraftInput::new(None, answers(2))).await.unwrap());
    let status = f.service.check_storage_limit().await.unwrap();
    assert_eq!(status.pending_drafts, 2);
    assert!(!status.within_limit);
}
