use crate::domain::entities::{AttachmentSlot, BinaryAttachment, RemoteFile};
use crate::domain::value_objects::{AttachmentId, DraftId};
use std::collections::{BTreeMap, HashSet};

/// Where the file in one attachment slot comes from on this save.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentSource {
    /// Freshly captured bytes, stored locally on this save.
    Captured {
        data: Vec<u8>,
        mime: String,
        original_name: String,
    },
    /// A blob stored by an earlier save.
    Existing(AttachmentId),
    /// A file already uploaded to the remote service.
    Remote(RemoteFile),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentInput {
    pub section_index: u32,
    pub item_index: u32,
    pub source: AttachmentSource,
}

impl AttachmentInput {
    pub fn captured(
        section_index: u32,
        item_index: u32,
        data: Vec<u8>,
        mime: impl Into<String>,
        original_name: impl Into<String>,
    ) -> Self {
        Self {
            section_index,
            item_index,
            source: AttachmentSource::Captured {
                data,
                mime: mime.into(),
                original_name: original_name.into(),
            },
        }
    }

    pub fn existing(section_index: u32, item_index: u32, id: AttachmentId) -> Self {
        Self {
            section_index,
            item_index,
            source: AttachmentSource::Existing(id),
        }
    }
}

/// Result of reconciling the submitted slot list with what is stored.
#[derive(Debug, Default)]
pub(crate) struct AttachmentPlan {
    pub slots: Vec<AttachmentSlot>,
    pub new_blobs: Vec<BinaryAttachment>,
    /// Stored blobs kept under a different slot than before.
    pub relocated: Vec<BinaryAttachment>,
    pub stale: Vec<AttachmentId>,
}

impl AttachmentPlan {
    /// Everything the local store has to write, moved blobs first.
    pub fn blobs_to_write(&self) -> Vec<BinaryAttachment> {
        self.relocated
            .iter()
            .chain(self.new_blobs.iter())
            .cloned()
            .collect()
    }
}

/// The submitted list is the full slot state: later entries for the same
/// slot win, and stored blobs no longer referenced become stale.
pub(crate) fn plan_attachments(
    draft_id: &DraftId,
    stored: &[BinaryAttachment],
    inputs: Vec<AttachmentInput>,
    now_ms: i64,
) -> AttachmentPlan {
    let mut by_slot: BTreeMap<(u32, u32), AttachmentSource> = BTreeMap::new();
    for input in inputs {
        by_slot.insert((input.section_index, input.item_index), input.source);
    }

    let mut plan = AttachmentPlan::default();
    let mut kept: HashSet<AttachmentId> = HashSet::new();

    for ((section_index, item_index), source) in by_slot {
        let slot = match source {
            AttachmentSource::Captured {
                data,
                mime,
                original_name,
            } => {
                let blob = BinaryAttachment::new(
                    draft_id.clone(),
                    section_index,
                    item_index,
                    data,
                    mime,
                    original_name,
                    now_ms,
                );
                let slot = slot_for_blob(&blob);
                plan.new_blobs.push(blob);
                slot
            }
            AttachmentSource::Existing(id) => {
                kept.insert(id.clone());
                match stored.iter().find(|blob| blob.id == id) {
                    Some(blob) => {
                        if (blob.section_index, blob.item_index) != (section_index, item_index) {
                            let mut moved = blob.clone();
                            moved.section_index = section_index;
                            moved.item_index = item_index;
                            plan.relocated.push(moved);
                        }
                        AttachmentSlot {
                            section_index,
                            item_index,
                            ..slot_for_blob(blob)
                        }
                    }
                    None => AttachmentSlot {
                        section_index,
                        item_index,
                        attachment_id: Some(id),
                        original_name: None,
                        mime: None,
                        size_bytes: None,
                        remote: None,
                    },
                }
            }
            AttachmentSource::Remote(remote) => AttachmentSlot {
                section_index,
                item_index,
                attachment_id: None,
                original_name: None,
                mime: None,
                size_bytes: None,
                remote: Some(remote),
            },
        };
        plan.slots.push(slot);
    }

    plan.stale = stored
        .iter()
        .filter(|blob| !kept.contains(&blob.id))
        .map(|blob| blob.id.clone())
        .collect();
    plan
}

fn slot_for_blob(blob: &BinaryAttachment) -> AttachmentSlot {
    AttachmentSlot {
        section_index: blob.section_index,
        item_index: blob.item_index,
        attachment_id: Some(blob.id.clone()),
        original_name: Some(blob.original_name.clone()),
        mime: Some(blob.mime.clone()),
        size_bytes: Some(blob.size_bytes),
        remote: None,
    }
}
