use super::{DRAFT_MIRROR_KEY, DraftMirror, DraftSource, RestoredDraft};
use crate::application::ports::{FallbackStore, LocalStore};
use crate::domain::entities::{AttachmentSlot, BinaryAttachment};
use crate::domain::value_objects::OwnerId;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) enum SourceRead {
    Found(RestoredDraft),
    Absent,
    Failed(String),
}

/// One step of the ordered restore strategy.
#[async_trait]
pub(crate) trait DraftReadSource: Send + Sync {
    fn source(&self) -> DraftSource;

    async fn read(&self, owner: &OwnerId) -> SourceRead;
}

/// Slots that reference a blob which was not found and have no remote copy.
fn unresolved_slots(slots: &[AttachmentSlot], blobs: &[BinaryAttachment]) -> Vec<AttachmentSlot> {
    slots
        .iter()
        .filter(|slot| slot.remote.is_none())
        .filter(|slot| match &slot.attachment_id {
            Some(id) => !blobs.iter().any(|blob| &blob.id == id),
            None => false,
        })
        .cloned()
        .collect()
}

pub(crate) struct DurableDraftSource {
    pub store: Arc<dyn LocalStore>,
}

#[async_trait]
impl DraftReadSource for DurableDraftSource {
    fn source(&self) -> DraftSource {
        DraftSource::Durable
    }

    async fn read(&self, owner: &OwnerId) -> SourceRead {
        let drafts = match self.store.drafts_by_owner(owner).await {
            Ok(drafts) => drafts,
            Err(err) => return SourceRead::Failed(err.to_string()),
        };
        // drafts_by_owner is newest first
        let Some(record) = drafts.into_iter().find(|d| d.status.is_restorable()) else {
            return SourceRead::Absent;
        };

        let attachments = match self.store.attachments_for_draft(&record.id).await {
            Ok(blobs) => blobs,
            Err(err) => {
                warn!(target: "offline::draft", draft_id = %record.id, error = %err, "attachments unavailable on restore");
                Vec::new()
            }
        };
        let unresolved = unresolved_slots(&record.attachments, &attachments);
        SourceRead::Found(RestoredDraft {
            record,
            attachments,
            unresolved,
            source: DraftSource::Durable,
        })
    }
}

/// Reads the placeholder mirror and rehydrates blobs from the local store
/// when it is reachable.
pub(crate) struct FallbackDraftSource {
    pub fallback: Arc<dyn FallbackStore>,
    pub store: Arc<dyn LocalStore>,
}

#[async_trait]
impl DraftReadSource for FallbackDraftSource {
    fn source(&self) -> DraftSource {
        DraftSource::Fallback
    }

    async fn read(&self, owner: &OwnerId) -> SourceRead {
        let raw = match self.fallback.get(DRAFT_MIRROR_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return SourceRead::Absent,
            Err(err) => return SourceRead::Failed(err.to_string()),
        };
        let mirror: DraftMirror = match serde_json::from_str(&raw) {
            Ok(mirror) => mirror,
            Err(err) => {
                warn!(target: "offline::draft", error = %err, "unreadable draft mirror");
                return SourceRead::Failed(err.to_string());
            }
        };
        if &mirror.record.owner_id != owner || !mirror.record.status.is_restorable() {
            return SourceRead::Absent;
        }

        let mut attachments = Vec::new();
        for id in mirror.record.attachments.iter().filter_map(|s| s.attachment_id.as_ref()) {
            match self.store.get_attachment(id).await {
                Ok(Some(blob)) => attachments.push(blob),
                Ok(None) => {}
                Err(err) => {
                    debug!(target: "offline::draft", attachment_id = %id, error = %err, "blob not rehydrated");
                }
            }
        }
        let unresolved = unresolved_slots(&mirror.record.attachments, &attachments);
        SourceRead::Found(RestoredDraft {
            record: mirror.record,
            attachments,
            unresolved,
            source: DraftSource::Fallback,
        })
    }
}
