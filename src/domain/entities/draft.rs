use crate::domain::value_objects::{AttachmentId, DraftId, DraftStatus, OwnerId, Payload};
use serde::{Deserialize, Serialize};

/// Reference to a file already uploaded to the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteFile {
    pub file_id: String,
    pub url: String,
}

/// Position of a captured file inside the draft payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttachmentSlot {
    pub section_index: u32,
    pub item_index: u32,
    pub attachment_id: Option<AttachmentId>,
    pub original_name: Option<String>,
    pub mime: Option<String>,
    pub size_bytes: Option<u64>,
    pub remote: Option<RemoteFile>,
}

impl AttachmentSlot {
    pub fn key(&self) -> (u32, u32) {
        (self.section_index, self.item_index)
    }

    /// Placeholder marker kept in reduced mirrors: identity only, no remote data.
    pub fn to_placeholder(&self) -> AttachmentSlot {
        AttachmentSlot {
            section_index: self.section_index,
            item_index: self.item_index,
            attachment_id: self.attachment_id.clone(),
            original_name: self.original_name.clone(),
            mime: None,
            size_bytes: None,
            remote: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DraftRecord {
    pub id: DraftId,
    pub owner_id: OwnerId,
    pub payload: Payload,
    pub attachments: Vec<AttachmentSlot>,
    pub created_at: i64,
    pub updated_at: i64,
    pub status: DraftStatus,
    pub auto_saved: bool,
    pub synced_at: Option<i64>,
    pub remote_id: Option<String>,
}

impl DraftRecord {
    pub fn new(id: DraftId, owner_id: OwnerId, payload: Payload, now_ms: i64) -> Self {
        Self {
            id,
            owner_id,
            payload,
            attachments: Vec::new(),
            created_at: now_ms,
            updated_at: now_ms,
            status: DraftStatus::AutoSaved,
            auto_saved: true,
            synced_at: None,
            remote_id: None,
        }
    }

    /// Routine auto-save transition. Never produces `pending_sync`.
    pub fn mark_auto_saved(&mut self, now_ms: i64) {
        self.status = DraftStatus::AutoSaved;
        self.auto_saved = true;
        self.touch(now_ms);
    }

    /// Explicit finalize transition, the only way into `pending_sync`.
    pub fn mark_pending_sync(&mut self, now_ms: i64) {
        self.status = DraftStatus::PendingSync;
        self.auto_saved = false;
        self.touch(now_ms);
    }

    pub fn mark_synced(&mut self, now_ms: i64, remote_id: Option<String>) {
        self.status = DraftStatus::Synced;
        self.auto_saved = false;
        self.synced_at = Some(now_ms);
        if remote_id.is_some() {
            self.remote_id = remote_id;
        }
        self.touch(now_ms);
    }

    pub fn mark_error(&mut self, now_ms: i64) {
        self.status = DraftStatus::Error;
        self.touch(now_ms);
    }

    /// `updated_at` never moves backwards, even if the clock does.
    fn touch(&mut self, now_ms: i64) {
        self.updated_at = now_ms.max(self.updated_at.saturating_add(1));
    }

    pub fn is_consistent(&self) -> bool {
        !(self.auto_saved && self.status == DraftStatus::PendingSync)
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.updated_at)
    }
}
