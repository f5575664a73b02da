use crate::application::ports::LocalStore;
use crate::domain::entities::{BinaryAttachment, DraftRecord, QueueItem};
use crate::domain::value_objects::{AttachmentId, DraftId, KeyRange, OwnerId, QueueItemId};
use crate::infrastructure::database::StoreHandle;
use crate::infrastructure::offline::SqliteLocalStore;
use crate::shared::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Local store that opens its handle on first use. While the database cannot
/// be opened every call fails with `AppError::Storage`, and the next call
/// tries again.
pub struct LazyLocalStore {
    handle: Arc<StoreHandle>,
}

impl LazyLocalStore {
    pub fn new(handle: Arc<StoreHandle>) -> Self {
        Self { handle }
    }

    pub fn is_available(&self) -> bool {
        self.handle.is_open()
    }

    async fn store(&self) -> Result<Arc<SqliteLocalStore>, AppError> {
        self.handle.open().await.map_err(|err| {
            debug!(target: "offline::store", error = %err, "local store still unavailable");
            AppError::Storage(format!("local store unavailable: {err}"))
        })
    }
}

#[async_trait]
impl LocalStore for LazyLocalStore {
    async fn put_draft(&self, draft: &DraftRecord) -> Result<(), AppError> {
        self.store().await?.put_draft(draft).await
    }

    async fn get_draft(&self, id: &DraftId) -> Result<Option<DraftRecord>, AppError> {
        self.store().await?.get_draft(id).await
    }

    async fn delete_draft(&self, id: &DraftId) -> Result<bool, AppError> {
        self.store().await?.delete_draft(id).await
    }

    async fn drafts_by_owner(&self, owner: &OwnerId) -> Result<Vec<DraftRecord>, AppError> {
        self.store().await?.drafts_by_owner(owner).await
    }

    async fn drafts_by_updated_at(
        &self,
        range: KeyRange<i64>,
    ) -> Result<Vec<DraftRecord>, AppError> {
        self.store().await?.drafts_by_updated_at(range).await
    }

    async fn put_attachment(&self, attachment: &BinaryAttachment) -> Result<(), AppError> {
        self.store().await?.put_attachment(attachment).await
    }

    async fn put_attachments(&self, attachments: &[BinaryAttachment]) -> Result<(), AppError> {
        self.store().await?.put_attachments(attachments).await
    }

    async fn get_attachment(
        &self,
        id: &AttachmentId,
    ) -> Result<Option<BinaryAttachment>, AppError> {
        self.store().await?.get_attachment(id).await
    }

    async fn attachments_for_draft(
        &self,
        draft_id: &DraftId,
    ) -> Result<Vec<BinaryAttachment>, AppError> {
        self.store().await?.attachments_for_draft(draft_id).await
    }

    async fn delete_attachment(&self, id: &AttachmentId) -> Result<bool, AppError> {
        self.store().await?.delete_attachment(id).await
    }

    async fn put_queue_item(&self, item: &QueueItem) -> Result<(), AppError> {
        self.store().await?.put_queue_item(item).await
    }

    async fn get_queue_item(&self, id: &QueueItemId) -> Result<Option<QueueItem>, AppError> {
        self.store().await?.get_queue_item(id).await
    }

    async fn delete_queue_item(&self, id: &QueueItemId) -> Result<bool, AppError> {
        self.store().await?.delete_queue_item(id).await
    }

    async fn queue_by_next_retry(&self, range: KeyRange<i64>) -> Result<Vec<QueueItem>, AppError> {
        self.store().await?.queue_by_next_retry(range).await
    }

    async fn all_queue_items(&self) -> Result<Vec<QueueItem>, AppError> {
        self.store().await?.all_queue_items().await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<Value>, AppError> {
        self.store().await?.get_setting(key).await
    }

    async fn put_setting(&self, key: &str, value: &Value) -> Result<(), AppError> {
        self.store().await?.put_setting(key, value).await
    }

    async fn delete_setting(&self, key: &str) -> Result<bool, AppError> {
        self.store().await?.delete_setting(key).await
    }

    async fn storage_usage_bytes(&self) -> Result<u64, AppError> {
        self.store().await?.storage_usage_bytes().await
    }
}
