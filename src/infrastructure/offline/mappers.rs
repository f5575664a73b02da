use super::rows::{AttachmentRow, DraftRow, QueueRow};
use crate::domain::entities::{AttachmentSlot, BinaryAttachment, DraftRecord, QueueItem};
use crate::domain::value_objects::{
    AttachmentId, DraftId, DraftStatus, MutationType, OwnerId, Payload, QueueItemId,
};
use crate::shared::error::AppError;
use std::convert::TryFrom;

pub fn draft_from_row(row: DraftRow) -> Result<DraftRecord, AppError> {
    let attachments: Vec<AttachmentSlot> = serde_json::from_str(&row.attachments)?;
    Ok(DraftRecord {
        id: DraftId::new(row.id).map_err(AppError::DeserializationError)?,
        owner_id: OwnerId::new(row.owner_id).map_err(AppError::DeserializationError)?,
        payload: Payload::from_json_str(&row.payload).map_err(AppError::DeserializationError)?,
        attachments,
        created_at: row.created_at,
        updated_at: row.updated_at,
        status: DraftStatus::try_from(row.status.as_str())
            .map_err(AppError::DeserializationError)?,
        auto_saved: row.auto_saved,
        synced_at: row.synced_at,
        remote_id: row.remote_id,
    })
}

pub fn attachment_from_row(row: AttachmentRow) -> Result<BinaryAttachment, AppError> {
    Ok(BinaryAttachment {
        id: AttachmentId::new(row.id).map_err(AppError::DeserializationError)?,
        draft_id: DraftId::new(row.draft_id).map_err(AppError::DeserializationError)?,
        section_index: to_u32(row.section_index, "section_index")?,
        item_index: to_u32(row.item_index, "item_index")?,
        mime: row.mime,
        size_bytes: u64::try_from(row.size_bytes).unwrap_or(row.data.len() as u64),
        original_name: row.original_name,
        data: row.data,
        created_at: row.created_at,
    })
}

pub fn queue_item_from_row(row: QueueRow) -> Result<QueueItem, AppError> {
    Ok(QueueItem {
        id: QueueItemId::new(row.id).map_err(AppError::DeserializationError)?,
        mutation_type: MutationType::from(row.mutation_type.as_str()),
        target_id: row.target_id,
        payload: Payload::from_json_str(&row.payload).map_err(AppError::DeserializationError)?,
        retries: to_u32(row.retries, "retries")?,
        last_error: row.last_error,
        created_at: row.created_at,
        next_retry: row.next_retry,
        priority: row.priority,
        quarantined: row.quarantined,
    })
}

fn to_u32(value: i64, field: &str) -> Result<u32, AppError> {
    u32::try_from(value)
        .map_err(|_| AppError::DeserializationError(format!("{field} out of range: {value}")))
}
