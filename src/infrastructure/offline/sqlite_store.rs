use super::mappers::{attachment_from_row, draft_from_row, queue_item_from_row};
use super::rows::{AttachmentRow, DraftRow, QueueRow};
use crate::application::ports::LocalStore;
use crate::domain::entities::{BinaryAttachment, DraftRecord, QueueItem};
use crate::domain::value_objects::{AttachmentId, DraftId, KeyRange, OwnerId, QueueItemId};
use crate::infrastructure::database::ensure_schema;
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use std::future::Future;
use tracing::warn;

const DRAFT_COLUMNS: &str = "id, owner_id, payload, attachments, status, auto_saved, \
                             created_at, updated_at, synced_at, remote_id";
const ATTACHMENT_COLUMNS: &str = "id, draft_id, section_index, item_index, mime, size_bytes, \
                                  original_name, data, created_at";
const QUEUE_COLUMNS: &str = "id, mutation_type, target_id, payload, retries, last_error, \
                             created_at, next_retry, priority, quarantined";

/// SQLite-backed local durable store.
#[derive(Clone)]
pub struct SqliteLocalStore {
    pool: SqlitePool,
}

impl SqliteLocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens a store on an existing pool, creating any missing collection first.
    pub async fn with_schema(pool: SqlitePool) -> Result<Self, AppError> {
        ensure_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs `operation`; if it fails because a collection is missing, re-runs
    /// the schema upgrade once and retries.
    async fn healing<T, F, Fut>(&self, operation: &'static str, run: F) -> Result<T, AppError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, sqlx::Error>> + Send,
        T: Send,
    {
        match run().await.map_err(AppError::from) {
            Err(AppError::MissingCollection(message)) => {
                warn!(
                    target: "offline::store",
                    operation,
                    error = %message,
                    "collection missing, recreating"
                );
                ensure_schema(&self.pool).await?;
                run().await.map_err(AppError::from)
            }
            other => other,
        }
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn put_draft(&self, draft: &DraftRecord) -> Result<(), AppError> {
        let payload = serde_json::to_string(&draft.payload)?;
        let attachments = serde_json::to_string(&draft.attachments)?;
        let (pool, payload, attachments) = (&self.pool, payload.as_str(), attachments.as_str());

        self.healing("put_draft", move || async move {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO drafts (
                    id, owner_id, payload, attachments, status, auto_saved,
                    created_at, updated_at, synced_at, remote_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(draft.id.as_str())
            .bind(draft.owner_id.as_str())
            .bind(payload)
            .bind(attachments)
            .bind(draft.status.as_str())
            .bind(draft.auto_saved)
            .bind(draft.created_at)
            .bind(draft.updated_at)
            .bind(draft.synced_at)
            .bind(draft.remote_id.as_deref())
            .execute(pool)
            .await
        })
        .await?;
        Ok(())
    }

    async fn get_draft(&self, id: &DraftId) -> Result<Option<DraftRecord>, AppError> {
        let pool = &self.pool;
        let sql = format!("SELECT {DRAFT_COLUMNS} FROM drafts WHERE id = ?1");
        let sql = sql.as_str();
        let row = self
            .healing("get_draft", move || async move {
                sqlx::query_as::<_, DraftRow>(sql)
                    .bind(id.as_str())
                    .fetch_optional(pool)
                    .await
            })
            .await?;
        row.map(draft_from_row).transpose()
    }

    async fn delete_draft(&self, id: &DraftId) -> Result<bool, AppError> {
        let pool = &self.pool;
        let deleted = self
            .healing("delete_draft", move || async move {
                let mut tx = pool.begin().await?;
                sqlx::query("DELETE FROM attachments WHERE draft_id = ?1")
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await?;
                let result = sqlx::query("DELETE FROM drafts WHERE id = ?1")
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok::<u64, sqlx::Error>(result.rows_affected())
            })
            .await?;
        Ok(deleted > 0)
    }

    async fn drafts_by_owner(&self, owner: &OwnerId) -> Result<Vec<DraftRecord>, AppError> {
        let pool = &self.pool;
        let sql = format!(
            "SELECT {DRAFT_COLUMNS} FROM drafts WHERE owner_id = ?1 ORDER BY updated_at DESC"
        );
        let sql = sql.as_str();
        let rows = self
            .healing("drafts_by_owner", move || async move {
                sqlx::query_as::<_, DraftRow>(sql)
                    .bind(owner.as_str())
                    .fetch_all(pool)
                    .await
            })
            .await?;
        rows.into_iter().map(draft_from_row).collect()
    }

    async fn drafts_by_updated_at(
        &self,
        range: KeyRange<i64>,
    ) -> Result<Vec<DraftRecord>, AppError> {
        let pool = &self.pool;
        let (min, max) = range.to_sql_bounds();
        let sql = format!(
            "SELECT {DRAFT_COLUMNS} FROM drafts WHERE updated_at BETWEEN ?1 AND ?2 \
             ORDER BY updated_at ASC"
        );
        let sql = sql.as_str();
        let rows = self
            .healing("drafts_by_updated_at", move || async move {
                sqlx::query_as::<_, DraftRow>(sql)
                    .bind(min)
                    .bind(max)
                    .fetch_all(pool)
                    .await
            })
            .await?;
        rows.into_iter().map(draft_from_row).collect()
    }

    async fn put_attachment(&self, attachment: &BinaryAttachment) -> Result<(), AppError> {
        let pool = &self.pool;
        let size = i64::try_from(attachment.size_bytes).unwrap_or(i64::MAX);
        self.healing("put_attachment", move || async move {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO attachments (
                    id, draft_id, section_index, item_index, mime, size_bytes,
                    original_name, data, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(attachment.id.as_str())
            .bind(attachment.draft_id.as_str())
            .bind(i64::from(attachment.section_index))
            .bind(i64::from(attachment.item_index))
            .bind(attachment.mime.as_str())
            .bind(size)
            .bind(attachment.original_name.as_str())
            .bind(attachment.data.as_slice())
            .bind(attachment.created_at)
            .execute(pool)
            .await
        })
        .await?;
        Ok(())
    }

    async fn put_attachments(&self, attachments: &[BinaryAttachment]) -> Result<(), AppError> {
        let pool = &self.pool;
        self.healing("put_attachments", move || async move {
            let mut tx = pool.begin().await?;
            for attachment in attachments {
                sqlx::query("DELETE FROM attachments WHERE id = ?1")
                    .bind(attachment.id.as_str())
                    .execute(&mut *tx)
                    .await?;
            }
            for attachment in attachments {
                sqlx::query(
                    r#"
                    INSERT OR REPLACE INTO attachments (
                        id, draft_id, section_index, item_index, mime, size_bytes,
                        original_name, data, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                )
                .bind(attachment.id.as_str())
                .bind(attachment.draft_id.as_str())
                .bind(i64::from(attachment.section_index))
                .bind(i64::from(attachment.item_index))
                .bind(attachment.mime.as_str())
                .bind(i64::try_from(attachment.size_bytes).unwrap_or(i64::MAX))
                .bind(attachment.original_name.as_str())
                .bind(attachment.data.as_slice())
                .bind(attachment.created_at)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await
        })
        .await
    }

    async fn get_attachment(
        &self,
        id: &AttachmentId,
    ) -> Result<Option<BinaryAttachment>, AppError> {
        let pool = &self.pool;
        let sql = format!("SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE id = ?1");
        let sql = sql.as_str();
        let row = self
            .healing("get_attachment", move || async move {
                sqlx::query_as::<_, AttachmentRow>(sql)
                    .bind(id.as_str())
                    .fetch_optional(pool)
                    .await
            })
            .await?;
        row.map(attachment_from_row).transpose()
    }

    async fn attachments_for_draft(
        &self,
        draft_id: &DraftId,
    ) -> Result<Vec<BinaryAttachment>, AppError> {
        let pool = &self.pool;
        let sql = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE draft_id = ?1 \
             ORDER BY section_index ASC, item_index ASC"
        );
        let sql = sql.as_str();
        let rows = self
            .healing("attachments_for_draft", move || async move {
                sqlx::query_as::<_, AttachmentRow>(sql)
                    .bind(draft_id.as_str())
                    .fetch_all(pool)
                    .await
            })
            .await?;
        rows.into_iter().map(attachment_from_row).collect()
    }

    async fn delete_attachment(&self, id: &AttachmentId) -> Result<bool, AppError> {
        let pool = &self.pool;
        let result = self
            .healing("delete_attachment", move || async move {
                sqlx::query("DELETE FROM attachments WHERE id = ?1")
                    .bind(id.as_str())
                    .execute(pool)
                    .await
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn put_queue_item(&self, item: &QueueItem) -> Result<(), AppError> {
        let payload = serde_json::to_string(&item.payload)?;
        let (pool, payload) = (&self.pool, payload.as_str());
        self.healing("put_queue_item", move || async move {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO queue (
                    id, mutation_type, target_id, payload, retries, last_error,
                    created_at, next_retry, priority, quarantined
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(item.id.as_str())
            .bind(item.mutation_type.as_str())
            .bind(item.target_id.as_str())
            .bind(payload)
            .bind(i64::from(item.retries))
            .bind(item.last_error.as_deref())
            .bind(item.created_at)
            .bind(item.next_retry)
            .bind(item.priority)
            .bind(item.quarantined)
            .execute(pool)
            .await
        })
        .await?;
        Ok(())
    }

    async fn get_queue_item(&self, id: &QueueItemId) -> Result<Option<QueueItem>, AppError> {
        let pool = &self.pool;
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM queue WHERE id = ?1");
        let sql = sql.as_str();
        let row = self
            .healing("get_queue_item", move || async move {
                sqlx::query_as::<_, QueueRow>(sql)
                    .bind(id.as_str())
                    .fetch_optional(pool)
                    .await
            })
            .await?;
        row.map(queue_item_from_row).transpose()
    }

    async fn delete_queue_item(&self, id: &QueueItemId) -> Result<bool, AppError> {
        let pool = &self.pool;
        let result = self
            .healing("delete_queue_item", move || async move {
                sqlx::query("DELETE FROM queue WHERE id = ?1")
                    .bind(id.as_str())
                    .execute(pool)
                    .await
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn queue_by_next_retry(&self, range: KeyRange<i64>) -> Result<Vec<QueueItem>, AppError> {
        let pool = &self.pool;
        let (min, max) = range.to_sql_bounds();
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM queue WHERE next_retry BETWEEN ?1 AND ?2 \
             ORDER BY next_retry ASC"
        );
        let sql = sql.as_str();
        let rows = self
            .healing("queue_by_next_retry", move || async move {
                sqlx::query_as::<_, QueueRow>(sql)
                    .bind(min)
                    .bind(max)
                    .fetch_all(pool)
                    .await
            })
            .await?;
        rows.into_iter().map(queue_item_from_row).collect()
    }

    async fn all_queue_items(&self) -> Result<Vec<QueueItem>, AppError> {
        let pool = &self.pool;
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM queue ORDER BY created_at ASC");
        let sql = sql.as_str();
        let rows = self
            .healing("all_queue_items", move || async move {
                sqlx::query_as::<_, QueueRow>(sql).fetch_all(pool).await
            })
            .await?;
        rows.into_iter().map(queue_item_from_row).collect()
    }

    async fn get_setting(&self, key: &str) -> Result<Option<Value>, AppError> {
        let pool = &self.pool;
        let raw: Option<String> = self
            .healing("get_setting", move || async move {
                sqlx::query_scalar("SELECT value FROM settings WHERE key = ?1")
                    .bind(key)
                    .fetch_optional(pool)
                    .await
            })
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put_setting(&self, key: &str, value: &Value) -> Result<(), AppError> {
        let serialized = serde_json::to_string(value)?;
        let (pool, serialized) = (&self.pool, serialized.as_str());
        let now = Utc::now().timestamp_millis();
        self.healing("put_setting", move || async move {
            sqlx::query(
                r#"
                INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(serialized)
            .bind(now)
            .execute(pool)
            .await
        })
        .await?;
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<bool, AppError> {
        let pool = &self.pool;
        let result = self
            .healing("delete_setting", move || async move {
                sqlx::query("DELETE FROM settings WHERE key = ?1")
                    .bind(key)
                    .execute(pool)
                    .await
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn storage_usage_bytes(&self) -> Result<u64, AppError> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(page_count.saturating_mul(page_size)).unwrap_or(0))
    }
}
