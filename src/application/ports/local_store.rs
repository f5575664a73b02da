use crate::domain::entities::{BinaryAttachment, DraftRecord, QueueItem};
use crate::domain::value_objects::{AttachmentId, DraftId, KeyRange, OwnerId, QueueItemId};
use crate::shared::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// Named collections of the local durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Drafts,
    Attachments,
    Queue,
    Settings,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Drafts,
        Collection::Attachments,
        Collection::Queue,
        Collection::Settings,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Drafts => "drafts",
            Collection::Attachments => "attachments",
            Collection::Queue => "queue",
            Collection::Settings => "settings",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Local durable store port.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert or overwrite a draft by identity.
    async fn put_draft(&self, draft: &DraftRecord) -> Result<(), AppError>;

    async fn get_draft(&self, id: &DraftId) -> Result<Option<DraftRecord>, AppError>;

    /// Delete a draft together with every attachment it owns.
    async fn delete_draft(&self, id: &DraftId) -> Result<bool, AppError>;

    /// Drafts of one owner, most recently updated first.
    async fn drafts_by_owner(&self, owner: &OwnerId) -> Result<Vec<DraftRecord>, AppError>;

    /// Drafts whose `updated_at` falls inside `range`, oldest first.
    async fn drafts_by_updated_at(
        &self,
        range: KeyRange<i64>,
    ) -> Result<Vec<DraftRecord>, AppError>;

    /// Insert an attachment, replacing whatever occupied the same slot.
    async fn put_attachment(&self, attachment: &BinaryAttachment) -> Result<(), AppError>;

    /// Writes a batch atomically. A blob already stored under another slot
    /// releases that slot before anything in the batch is inserted.
    async fn put_attachments(&self, attachments: &[BinaryAttachment]) -> Result<(), AppError>;

    async fn get_attachment(
        &self,
        id: &AttachmentId,
    ) -> Result<Option<BinaryAttachment>, AppError>;

    async fn attachments_for_draft(
        &self,
        draft_id: &DraftId,
    ) -> Result<Vec<BinaryAttachment>, AppError>;

    async fn delete_attachment(&self, id: &AttachmentId) -> Result<bool, AppError>;

    async fn put_queue_item(&self, item: &QueueItem) -> Result<(), AppError>;

    async fn get_queue_item(&self, id: &QueueItemId) -> Result<Option<QueueItem>, AppError>;

    async fn delete_queue_item(&self, id: &QueueItemId) -> Result<bool, AppError>;

    /// Queue items whose `next_retry` falls inside `range`, quarantined included.
    async fn queue_by_next_retry(&self, range: KeyRange<i64>) -> Result<Vec<QueueItem>, AppError>;

    async fn all_queue_items(&self) -> Result<Vec<QueueItem>, AppError>;

    async fn get_setting(&self, key: &str) -> Result<Option<Value>, AppError>;

    async fn put_setting(&self, key: &str, value: &Value) -> Result<(), AppError>;

    async fn delete_setting(&self, key: &str) -> Result<bool, AppError>;

    /// Bytes currently occupied by the store.
    async fn storage_usage_bytes(&self) -> Result<u64, AppError>;
}
