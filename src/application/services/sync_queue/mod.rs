mod events;
mod retry_policy;
#[cfg(test)]
mod tests;

pub use events::{QueueEvent, QueueEventBus, SubscriptionId};
pub use retry_policy::{RetryDecision, RetryPolicy};

use crate::application::ports::{
    CredentialProvider, LocalStore, MutationAck, MutationError, MutationHandler, MutationRequest,
    NoCredentials,
};
use crate::domain::entities::{BinaryAttachment, QueueItem, QueueStats};
use crate::domain::value_objects::{
    AttachmentId, DraftId, KeyRange, MutationType, Payload, QueueItemId,
};
use crate::infrastructure::jobs::{QueueProcessingJob, QueueTriggers};
use crate::infrastructure::offline::{QueueRetryMetrics, RetryOutcome};
use crate::shared::clock::Clock;
use crate::shared::config::SyncConfig;
use crate::shared::error::AppError;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A create/update whose record vanished from the local store is given up
/// after this many attempts.
const INCOMPLETE_RECORD_RETRY_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ProcessReport {
    /// False when another cycle was already in flight.
    pub ran: bool,
    pub attempted: u32,
    pub succeeded: u32,
    pub retried: u32,
    pub quarantined: u32,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ProcessingState {
    pub running: bool,
    pub in_flight: bool,
    pub subscribers: usize,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Durable, priority-ordered queue of pending remote mutations.
pub struct SyncQueue {
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    credentials: Arc<dyn CredentialProvider>,
    handlers: RwLock<HashMap<MutationType, Arc<dyn MutationHandler>>>,
    policy: RetryPolicy,
    interval: Duration,
    attachment_priority: i64,
    events: QueueEventBus,
    metrics: QueueRetryMetrics,
    in_flight: AtomicBool,
    wakeup: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncQueue {
    pub fn new(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>, config: &SyncConfig) -> Self {
        Self {
            store,
            clock,
            credentials: Arc::new(NoCredentials),
            handlers: RwLock::new(HashMap::new()),
            policy: RetryPolicy::from_config(config),
            interval: config.interval(),
            attachment_priority: config.attachment_priority,
            events: QueueEventBus::new(),
            metrics: QueueRetryMetrics::new(),
            in_flight: AtomicBool::new(false),
            wakeup: Arc::new(Notify::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn register_handler(&self, mutation_type: MutationType, handler: Arc<dyn MutationHandler>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(mutation_type, handler);
        }
    }

    pub fn events(&self) -> &QueueEventBus {
        &self.events
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Persists a new item and wakes the processing job.
    ///
    /// Processing is driven by the job spawned with [`SyncQueue::start`]. On a
    /// queue that was never started the item stays pending until `start` or an
    /// explicit [`SyncQueue::process_queue`]; the started job drains it on its
    /// first tick.
    pub async fn enqueue(
        &self,
        mutation_type: MutationType,
        target_id: impl Into<String>,
        payload: Payload,
        priority: i64,
    ) -> Result<QueueItemId, AppError> {
        let item = self.persist_new(mutation_type, target_id.into(), payload, priority).await?;
        if self.processing_state().running {
            self.wakeup.notify_one();
        } else {
            debug!(target: "offline::queue", item_id = %item, "processing job not started, item left pending");
        }
        Ok(item)
    }

    /// Queues an independent upload of a stored attachment. Does not wake the
    /// processing job; the upload rides along with the next cycle.
    pub async fn enqueue_attachment(
        &self,
        attachment: &BinaryAttachment,
    ) -> Result<QueueItemId, AppError> {
        let payload = Payload::new(json!({
            "draft_id": attachment.draft_id,
            "attachment_id": attachment.id,
            "section_index": attachment.section_index,
            "item_index": attachment.item_index,
            "mime": attachment.mime,
            "size_bytes": attachment.size_bytes,
            "original_name": attachment.original_name,
        }))
        .map_err(AppError::InvalidInput)?;

        self.persist_new(
            MutationType::UploadAttachment,
            attachment.id.to_string(),
            payload,
            self.attachment_priority,
        )
        .await
    }

    async fn persist_new(
        &self,
        mutation_type: MutationType,
        target_id: String,
        payload: Payload,
        priority: i64,
    ) -> Result<QueueItemId, AppError> {
        if target_id.trim().is_empty() {
            return Err(AppError::InvalidInput("queue target id cannot be empty".into()));
        }
        let item = QueueItem::new(mutation_type, target_id, payload, priority, self.clock.now_ms());
        self.store.put_queue_item(&item).await?;

        info!(
            target: "offline::queue",
            item_id = %item.id,
            mutation_type = %item.mutation_type,
            target_id = %item.target_id,
            priority = item.priority,
            "item enqueued"
        );
        self.events.emit(&QueueEvent::Enqueued {
            id: item.id.clone(),
            mutation_type: item.mutation_type.clone(),
        });
        Ok(item.id)
    }

    /// Runs one processing cycle over every item due now. A call made while a
    /// cycle is already in flight returns immediately with `ran == false`.
    pub async fn process_queue(&self) -> Result<ProcessReport, AppError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(target: "offline::queue", "processing cycle already in flight");
            return Ok(ProcessReport::default());
        }
        let _guard = InFlightGuard(&self.in_flight);

        let now = self.clock.now_ms();
        let mut items: Vec<QueueItem> = self
            .store
            .queue_by_next_retry(KeyRange::upper_bound(now))
            .await?
            .into_iter()
            .filter(|item| !item.quarantined)
            .collect();
        items.sort_by_key(QueueItem::schedule_key);

        let mut report = ProcessReport {
            ran: true,
            ..Default::default()
        };
        if items.is_empty() {
            debug!(target: "offline::queue", "no items ready");
            return Ok(report);
        }

        info!(target: "offline::queue", count = items.len(), "processing queue");
        let credential = match self.credentials.credential().await {
            Ok(credential) => credential,
            Err(err) => {
                warn!(target: "offline::queue", error = %err, "credential unavailable, continuing without");
                None
            }
        };

        for item in items {
            report.attempted += 1;
            self.events.emit(&QueueEvent::ItemProcessing { item: item.clone() });

            let outcome = match self.attempt(&item, credential.clone()).await {
                Ok(ack) => self.complete(&item, ack).await,
                Err(failure) => self.fail(&item, failure).await,
            };
            match outcome {
                Ok(Some(RetryOutcome::Success)) => report.succeeded += 1,
                Ok(Some(RetryOutcome::Retry)) => report.retried += 1,
                Ok(Some(RetryOutcome::Quarantined)) => report.quarantined += 1,
                Ok(None) => {}
                Err(err) => error!(
                    target: "offline::queue",
                    item_id = %item.id,
                    mutation_type = %item.mutation_type,
                    retries = item.retries,
                    error = %err,
                    "failed to record item outcome"
                ),
            }
        }

        info!(
            target: "offline::queue",
            attempted = report.attempted,
            succeeded = report.succeeded,
            retried = report.retried,
            quarantined = report.quarantined,
            "processing cycle finished"
        );
        Ok(report)
    }

    fn handler_for(&self, mutation_type: &MutationType) -> Option<Arc<dyn MutationHandler>> {
        self.handlers
            .read()
            .ok()
            .and_then(|handlers| handlers.get(mutation_type).cloned())
    }

    async fn attempt(
        &self,
        item: &QueueItem,
        credential: Option<String>,
    ) -> Result<MutationAck, MutationError> {
        let handler = self.handler_for(&item.mutation_type).ok_or_else(|| {
            MutationError::Permanent(format!("no handler registered for {}", item.mutation_type))
        })?;

        let attachments = self.resolve_attachments(item).await?;
        let request = MutationRequest {
            item: item.clone(),
            idempotency_key: item.target_id.clone(),
            credential,
            attachments,
        };
        handler.apply(&request).await
    }

    /// Loads the binary blobs a handler needs from the local store.
    async fn resolve_attachments(
        &self,
        item: &QueueItem,
    ) -> Result<Vec<BinaryAttachment>, MutationError> {
        match &item.mutation_type {
            MutationType::UploadAttachment => {
                let id = AttachmentId::new(item.target_id.clone()).map_err(MutationError::Permanent)?;
                match self.store.get_attachment(&id).await? {
                    Some(attachment) => Ok(vec![attachment]),
                    None => Err(MutationError::Permanent(format!(
                        "attachment {id} no longer stored locally"
                    ))),
                }
            }
            kind if kind.carries_attachments() => {
                let draft_id = DraftId::new(item.target_id.clone()).map_err(MutationError::Permanent)?;
                if self.store.get_draft(&draft_id).await?.is_none()
                    && item.retries >= INCOMPLETE_RECORD_RETRY_LIMIT
                {
                    return Err(MutationError::Permanent(format!(
                        "record {draft_id} still missing after {} attempts",
                        item.retries
                    )));
                }
                Ok(self.store.attachments_for_draft(&draft_id).await?)
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn complete(
        &self,
        item: &QueueItem,
        ack: MutationAck,
    ) -> Result<Option<RetryOutcome>, AppError> {
        let now = self.clock.now_ms();
        self.store.delete_queue_item(&item.id).await?;

        if item.mutation_type.settles_draft() {
            if let Ok(draft_id) = DraftId::new(item.target_id.clone()) {
                if let Some(mut draft) = self.store.get_draft(&draft_id).await? {
                    draft.mark_synced(now, ack.remote_id.clone());
                    self.store.put_draft(&draft).await?;
                }
            }
        }

        self.metrics.record(RetryOutcome::Success, now);
        info!(
            target: "offline::queue",
            item_id = %item.id,
            mutation_type = %item.mutation_type,
            retries = item.retries,
            remote_id = ?ack.remote_id,
            "item applied"
        );
        self.events.emit(&QueueEvent::ItemSuccess { item: item.clone() });
        Ok(Some(RetryOutcome::Success))
    }

    async fn fail(
        &self,
        item: &QueueItem,
        failure: MutationError,
    ) -> Result<Option<RetryOutcome>, AppError> {
        // Re-read right before writing so a concurrent clear or edit is not overwritten.
        let Some(mut current) = self.store.get_queue_item(&item.id).await? else {
            debug!(target: "offline::queue", item_id = %item.id, "item removed during attempt");
            return Ok(None);
        };

        let now = self.clock.now_ms();
        let retries = current.retries.saturating_add(1);
        let message = failure.to_string();
        current.last_error = Some(message.clone());

        match self.policy.decide(retries, failure.is_permanent()) {
            RetryDecision::Quarantine => {
                let reason = if retries >= self.policy.max_retries() {
                    format!("max retries ({}) reached", self.policy.max_retries())
                } else {
                    "permanent failure".to_string()
                };
                current.retries = retries.max(self.policy.max_retries());
                current.quarantined = true;
                self.store.put_queue_item(&current).await?;
                self.metrics.record(RetryOutcome::Quarantined, now);

                error!(
                    target: "offline::queue",
                    item_id = %current.id,
                    mutation_type = %current.mutation_type,
                    retries = current.retries,
                    error = %message,
                    reason = %reason,
                    "item quarantined"
                );
                self.events.emit(&QueueEvent::ItemFailed {
                    item: current,
                    error: message,
                    reason,
                });
                Ok(Some(RetryOutcome::Quarantined))
            }
            RetryDecision::Retry { delay_ms } => {
                current.retries = retries;
                current.next_retry = now.saturating_add(delay_ms);
                self.store.put_queue_item(&current).await?;
                self.metrics.record(RetryOutcome::Retry, now);

                warn!(
                    target: "offline::queue",
                    item_id = %current.id,
                    mutation_type = %current.mutation_type,
                    retries,
                    max_retries = self.policy.max_retries(),
                    delay_ms,
                    error = %message,
                    "item rescheduled"
                );
                let next_retry = current.next_retry;
                self.events.emit(&QueueEvent::ItemRetry {
                    item: current,
                    retries,
                    next_retry,
                });
                Ok(Some(RetryOutcome::Retry))
            }
        }
    }

    pub async fn get_stats(&self) -> Result<QueueStats, AppError> {
        let items = self.store.all_queue_items().await?;
        Ok(QueueStats::from_items(&items, self.metrics.snapshot()))
    }

    /// Operator action: deletes every quarantined or exhausted item.
    pub async fn clear_quarantined(&self) -> Result<u64, AppError> {
        let items = self.store.all_queue_items().await?;
        let mut removed = 0u64;
        for item in items
            .iter()
            .filter(|item| item.quarantined || self.policy.is_exhausted(item.retries))
        {
            if self.store.delete_queue_item(&item.id).await? {
                removed += 1;
            }
        }

        info!(target: "offline::queue", removed, "quarantined items cleared");
        self.events.emit(&QueueEvent::QueueCleared { count: removed });
        Ok(removed)
    }

    /// Starts the background processing job. Returns false if it is already running.
    pub fn start(self: &Arc<Self>, triggers: QueueTriggers) -> bool {
        let Ok(mut worker) = self.worker.lock() else {
            return false;
        };
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        *worker = Some(QueueProcessingJob::spawn(
            Arc::downgrade(self),
            Arc::clone(&self.wakeup),
            self.interval,
            triggers,
        ));
        drop(worker);

        info!(target: "offline::queue", interval_secs = self.interval.as_secs(), "queue processing started");
        self.events.emit(&QueueEvent::ProcessingStarted);
        true
    }

    pub fn stop(&self) -> bool {
        let handle = self.worker.lock().ok().and_then(|mut worker| worker.take());
        match handle {
            Some(handle) => {
                handle.abort();
                info!(target: "offline::queue", "queue processing stopped");
                self.events.emit(&QueueEvent::ProcessingStopped);
                true
            }
            None => false,
        }
    }

    pub fn processing_state(&self) -> ProcessingState {
        let running = self
            .worker
            .lock()
            .map(|worker| worker.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false);
        ProcessingState {
            running,
            in_flight: self.in_flight.load(Ordering::Acquire),
            subscribers: self.events.subscriber_count(),
        }
    }
}

impl Drop for SyncQueue {
    fn drop(&mut self) {
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                handle.abort();
            }
        }
    }
}
