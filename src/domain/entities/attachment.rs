use crate::domain::value_objects::{AttachmentId, DraftId};
use serde::{Deserialize, Serialize};

/// Captured file owned by a draft, addressed by `(draft_id, section_index, item_index)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BinaryAttachment {
    pub id: AttachmentId,
    pub draft_id: DraftId,
    pub section_index: u32,
    pub item_index: u32,
    pub mime: String,
    pub size_bytes: u64,
    pub original_name: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub created_at: i64,
}

impl BinaryAttachment {
    pub fn new(
        draft_id: DraftId,
        section_index: u32,
        item_index: u32,
        data: Vec<u8>,
        mime: String,
        original_name: String,
        now_ms: i64,
    ) -> Self {
        Self {
            id: AttachmentId::generate(),
            draft_id,
            section_index,
            item_index,
            size_bytes: data.len() as u64,
            mime,
            original_name,
            data,
            created_at: now_ms,
        }
    }

    pub fn key(&self) -> (u32, u32) {
        (self.section_index, self.item_index)
    }
}
