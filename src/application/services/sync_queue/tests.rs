use super::*;
use crate::domain::entities::{BinaryAttachment, DraftRecord};
use crate::domain::value_objects::{DraftStatus, OwnerId};
use crate::infrastructure::offline::SqliteLocalStore;
use crate::shared::clock::ManualClock;
use async_trait::async_trait;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::{HashMap as StdHashMap, VecDeque};
use std::sync::Mutex as StdMutex;

const T0: i64 = 1_700_000_000_000;

/// Remote stand-in keyed by idempotency key, with scripted failures.
#[derive(Default)]
struct ScriptedRemote {
    applied: StdMutex<StdHashMap<String, serde_json::Value>>,
    calls: StdMutex<Vec<String>>,
    failures: StdMutex<VecDeque<MutationError>>,
    attachment_counts: StdMutex<Vec<usize>>,
}

impl ScriptedRemote {
    fn fail_next(&self, errors: impl IntoIterator<Item = MutationError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MutationHandler for ScriptedRemote {
    async fn apply(&self, request: &MutationRequest) -> Result<MutationAck, MutationError> {
        self.calls.lock().unwrap().push(request.item.id.to_string());
        self.attachment_counts
            .lock()
            .unwrap()
            .push(request.attachments.len());
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.applied.lock().unwrap().insert(
            request.idempotency_key.clone(),
            request.item.payload.as_json().clone(),
        );
        Ok(MutationAck {
            remote_id: Some(format!("remote-{}", request.idempotency_key)),
        })
    }
}

struct Fixture {
    store: Arc<SqliteLocalStore>,
    clock: Arc<ManualClock>,
    queue: Arc<SyncQueue>,
    remote: Arc<ScriptedRemote>,
}

async fn fixture_with(config: SyncConfig) -> Fixture {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("pool");
    let store = Arc::new(SqliteLocalStore::with_schema(pool).await.expect("schema"));
    let clock = Arc::new(ManualClock::new(T0));
    let queue = Arc::new(SyncQueue::new(store.clone(), clock.clone(), &config));
    let remote = Arc::new(ScriptedRemote::default());
    for kind in [
        MutationType::CreateRecord,
        MutationType::UpdateRecord,
        MutationType::UploadAttachment,
    ] {
        queue.register_handler(kind, remote.clone());
    }
    Fixture {
        store,
        clock,
        queue,
        remote,
    }
}

async fn fixture() -> Fixture {
    fixture_with(SyncConfig::default()).await
}

fn payload(value: serde_json::Value) -> Payload {
    Payload::new(value).unwrap()
}

fn transient() -> MutationError {
    MutationError::Transient("network down".into())
}

#[tokio::test]
async fn cycle_orders_by_priority_then_age() {
    let f = fixture().await;
    let first = f
        .queue
        .enqueue(MutationType::CreateRecord, "draft_a", payload(json!({"n": 1})), 2)
        .await
        .unwrap();
    f.clock.advance_ms(1);
    let second = f
        .queue
        .enqueue(MutationType::CreateRecord, "draft_b", payload(json!({"n": 2})), 1)
        .await
        .unwrap();
    f.clock.advance_ms(1);
    let third = f
        .queue
        .enqueue(MutationType::CreateRecord, "draft_c", payload(json!({"n": 3})), 1)
        .await
        .unwrap();

    let report = f.queue.process_queue().await.unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 3);
    assert_eq!(
        f.remote.calls(),
        vec![second.to_string(), third.to_string(), first.to_string()]
    );
    assert!(f.store.all_queue_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn items_not_yet_due_are_left_alone() {
    let f = fixture().await;
    let id = f
        .queue
        .enqueue(MutationType::CreateRecord, "draft_a", payload(json!({})), 1)
        .await
        .unwrap();
    let mut item = f.store.get_queue_item(&id).await.unwrap().unwrap();
    item.next_retry = T0 + 60_000;
    f.store.put_queue_item(&item).await.unwrap();

    let report = f.queue.process_queue().await.unwrap();
    assert!(report.ran);
    assert_eq!(report.attempted, 0);
    assert!(f.remote.calls().is_empty());
}

#[tokio::test]
async fn backoff_deltas_follow_schedule_until_quarantine() {
    let f = fixture().await;
    let id = f
        .queue
        .enqueue(MutationType::CreateRecord, "draft_a", payload(json!({})), 1)
        .await
        .unwrap();
    f.remote.fail_next((0..5).map(|_| transient()));

    let mut previous = T0;
    let mut deltas = Vec::new();
    for _ in 0..4 {
        f.clock.set(previous);
        f.queue.process_queue().await.unwrap();
        let item = f.store.get_queue_item(&id).await.unwrap().unwrap();
        deltas.push(item.next_retry - previous);
        previous = item.next_retry;
    }
    assert_eq!(deltas, vec![10_000, 30_000, 60_000, 120_000]);

    f.clock.set(previous);
    let report = f.queue.process_queue().await.unwrap();
    assert_eq!(report.quarantined, 1);

    let item = f.store.get_queue_item(&id).await.unwrap().unwrap();
    assert!(item.quarantined);
    assert_eq!(item.retries, 5);
    assert_eq!(item.last_error.as_deref(), Some("transient failure: network down"));

    // Never scheduled again automatically.
    f.clock.advance_secs(3_600);
    let report = f.queue.process_queue().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(f.remote.calls().len(), 5);
}

#[tokio::test]
async fn longer_retry_budget_reaches_last_schedule_slot() {
    let config = SyncConfig {
        max_retries: 6,
        ..SyncConfig::default()
    };
    let f = fixture_with(config).await;
    let id = f
        .queue
        .enqueue(MutationType::CreateRecord, "draft_a", payload(json!({})), 1)
        .await
        .unwrap();
    f.remote.fail_next((0..5).map(|_| transient()));

    let mut previous = T0;
    let mut deltas = Vec::new();
    for _ in 0..5 {
        f.clock.set(previous);
        f.queue.process_queue().await.unwrap();
        let item = f.store.get_queue_item(&id).await.unwrap().unwrap();
        deltas.push(item.next_retry - previous);
        previous = item.next_retry;
    }
    assert_eq!(deltas, vec![10_000, 30_000, 60_000, 120_000, 300_000]);
}

#[tokio::test]
async fn permanent_rejection_quarantines_immediately() {
    let f = fixture().await;
    let events = Arc::new(StdMutex::new(Vec::new()));
    let sink = events.clone();
    f.queue.events().subscribe(move |event| {
        if let QueueEvent::ItemFailed { reason, .. } = event {
            sink.lock().unwrap().push(reason.clone());
        }
    });

    let id = f
        .queue
        .enqueue(MutationType::CreateRecord, "draft_a", payload(json!({})), 1)
        .await
        .unwrap();
    f.remote
        .fail_next([MutationError::Permanent("validation failed".into())]);

    let report = f.queue.process_queue().await.unwrap();
    assert_eq!(report.quarantined, 1);
    let item = f.store.get_queue_item(&id).await.unwrap().unwrap();
    assert!(item.quarantined);
    assert_eq!(item.retries, 5);
    assert_eq!(*events.lock().unwrap(), vec!["permanent failure".to_string()]);
}

#[tokio::test]
async fn missing_handler_is_a_permanent_failure() {
    let f = fixture().await;
    let id = f
        .queue
        .enqueue(
            MutationType::Custom("close_audit".into()),
            "draft_a",
            payload(json!({})),
            1,
        )
        .await
        .unwrap();

    f.queue.process_queue().await.unwrap();
    let item = f.store.get_queue_item(&id).await.unwrap().unwrap();
    assert!(item.quarantined);
    assert!(item.last_error.unwrap().contains("no handler"));
}

#[tokio::test]
async fn replaying_an_item_is_idempotent_on_the_remote() {
    let f = fixture().await;
    f.queue
        .enqueue(
            MutationType::CreateRecord,
            "draft_a",
            payload(json!({"title": "kitchen"})),
            1,
        )
        .await
        .unwrap();
    // Simulates a write that landed remotely but whose acknowledgement was lost.
    let item = f.store.all_queue_items().await.unwrap().remove(0);
    let request = MutationRequest {
        idempotency_key: item.target_id.clone(),
        item: item.clone(),
        credential: None,
        attachments: Vec::new(),
    };
    f.remote.apply(&request).await.unwrap();
    let after_first = f.remote.applied.lock().unwrap().clone();

    f.queue.process_queue().await.unwrap();

    let after_replay = f.remote.applied.lock().unwrap().clone();
    assert_eq!(after_first, after_replay);
    assert_eq!(after_replay.len(), 1);
}

#[tokio::test]
async fn success_marks_draft_synced_and_ships_attachments() {
    let f = fixture().await;
    let draft = DraftRecord::new(
        DraftId::generate(),
        OwnerId::new("auditor-1".into()).unwrap(),
        payload(json!({"answers": []})),
        T0,
    );
    f.store.put_draft(&draft).await.unwrap();
    let blob = BinaryAttachment::new(
        draft.id.clone(),
        0,
        0,
        vec![1, 2, 3],
        "image/jpeg".into(),
        "a.jpg".into(),
        T0,
    );
    f.store.put_attachment(&blob).await.unwrap();

    f.queue
        .enqueue(MutationType::CreateRecord, draft.id.to_string(), payload(json!({})), 1)
        .await
        .unwrap();
    f.queue.enqueue_attachment(&blob).await.unwrap();
    f.queue.process_queue().await.unwrap();

    assert_eq!(*f.remote.attachment_counts.lock().unwrap(), vec![1, 1]);
    let stored = f.store.get_draft(&draft.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DraftStatus::Synced);
    assert!(stored.synced_at.is_some());
    assert_eq!(stored.remote_id, Some(format!("remote-{}", draft.id)));
}

#[tokio::test]
async fn record_missing_after_repeated_attempts_is_given_up() {
    let f = fixture().await;
    let id = f
        .queue
        .enqueue(MutationType::CreateRecord, "draft_gone", payload(json!({})), 1)
        .await
        .unwrap();
    let mut item = f.store.get_queue_item(&id).await.unwrap().unwrap();
    item.retries = 3;
    f.store.put_queue_item(&item).await.unwrap();

    f.queue.process_queue().await.unwrap();

    assert!(f.remote.calls().is_empty());
    assert!(f.store.get_queue_item(&id).await.unwrap().unwrap().quarantined);
}

#[tokio::test]
async fn stats_and_clear_quarantined() {
    let f = fixture().await;
    f.queue
        .enqueue(MutationType::CreateRecord, "draft_a", payload(json!({})), 1)
        .await
        .unwrap();
    f.queue
        .enqueue(MutationType::Custom("orphan".into()), "draft_b", payload(json!({})), 1)
        .await
        .unwrap();
    f.remote.fail_next([transient()]);
    f.queue.process_queue().await.unwrap();

    let stats = f.queue.get_stats().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.quarantined, 1);
    assert_eq!(stats.total_including_quarantined, 2);
    assert_eq!(stats.by_retries.get(&1), Some(&1));
    assert_eq!(stats.metrics.total_retry, 1);
    assert_eq!(stats.metrics.total_quarantined, 1);

    let cleared = Arc::new(StdMutex::new(None));
    let sink = cleared.clone();
    f.queue.events().subscribe(move |event| {
        if let QueueEvent::QueueCleared { count } = event {
            *sink.lock().unwrap() = Some(*count);
        }
    });
    assert_eq!(f.queue.clear_quarantined().await.unwrap(), 1);
    assert_eq!(*cleared.lock().unwrap(), Some(1));
    assert_eq!(f.store.all_queue_items().await.unwrap().len(), 1);
}

#[tokio::test]
async fn reentrant_cycle_is_a_noop() {
    let f = fixture().await;
    f.queue.in_flight.store(true, Ordering::SeqCst);
    let report = f.queue.process_queue().await.unwrap();
    assert!(!report.ran);
    f.queue.in_flight.store(false, Ordering::SeqCst);
    assert!(f.queue.process_queue().await.unwrap().ran);
}

#[tokio::test]
async fn started_job_drains_enqueued_items() {
    let f = fixture().await;
    assert!(f.queue.start(QueueTriggers::default()));
    assert!(!f.queue.start(QueueTriggers::default()));
    assert!(f.queue.processing_state().running);

    f.queue
        .enqueue(MutationType::CreateRecord, "draft_a", payload(json!({})), 1)
        .await
        .unwrap();

    let mut drained = false;
    for _ in 0..50 {
        if f.store.all_queue_items().await.unwrap().is_empty() {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(drained);

    assert!(f.queue.stop());
    assert!(!f.queue.processing_state().running);
}

#[tokio::test]
async fn enqueue_before_start_waits_for_the_job() {
    let f = fixture().await;
    f.queue
        .enqueue(MutationType::CreateRecord, "draft_a", payload(json!({})), 1)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!f.queue.processing_state().running);
    assert!(f.remote.calls().is_empty());
    assert_eq!(f.store.all_queue_items().await.unwrap().len(), 1);

    assert!(f.queue.start(QueueTriggers::default()));
    let mut drained = false;
    for _ in 0..50 {
        if f.store.all_queue_items().await.unwrap().is_empty() {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(drained);
    assert_eq!(f.remote.calls().len(), 1);
    f.queue.stop();
}
