use super::{DRAFT_MIRROR_KEY, DraftMirror};
use crate::application::ports::{FallbackStore, LocalStore, RemoteDraftMirror};
use crate::application::services::fallback_mirror::{MirrorWrite, write_with_reduction};
use crate::domain::entities::{BinaryAttachment, DraftRecord};
use crate::domain::value_objects::AttachmentId;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Arrays above this serialized size are dropped from a reduced mirror.
const REDUCED_ARRAY_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum TierOutcome {
    Written,
    /// Persisted in reduced form.
    Reduced,
    Skipped(String),
    Failed(String),
}

impl TierOutcome {
    pub fn persisted(&self) -> bool {
        matches!(self, TierOutcome::Written | TierOutcome::Reduced)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierReport {
    pub tier: &'static str,
    pub outcome: TierOutcome,
}

pub(crate) struct WriteContext<'a> {
    pub record: &'a DraftRecord,
    /// New and relocated blobs.
    pub blobs: &'a [BinaryAttachment],
    pub stale: &'a [AttachmentId],
    pub online: bool,
    pub credential: Option<&'a str>,
    pub now_ms: i64,
}

/// One step of the ordered draft write strategy.
#[async_trait]
pub(crate) trait DraftWriteTier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a finalize must stop when this tier fails.
    fn required_for_finalize(&self) -> bool {
        false
    }

    async fn write(&self, ctx: &WriteContext<'_>) -> TierOutcome;
}

/// Local store: draft plus binary attachments.
pub(crate) struct DurableDraftTier {
    pub store: Arc<dyn LocalStore>,
}

#[async_trait]
impl DraftWriteTier for DurableDraftTier {
    fn name(&self) -> &'static str {
        "durable"
    }

    fn required_for_finalize(&self) -> bool {
        true
    }

    async fn write(&self, ctx: &WriteContext<'_>) -> TierOutcome {
        if !ctx.blobs.is_empty() {
            if let Err(err) = self.store.put_attachments(ctx.blobs).await {
                warn!(
                    target: "offline::draft",
                    draft_id = %ctx.record.id,
                    count = ctx.blobs.len(),
                    error = %err,
                    "attachment write failed"
                );
                return TierOutcome::Failed(err.to_string());
            }
        }

        if let Err(err) = self.store.put_draft(ctx.record).await {
            warn!(target: "offline::draft", draft_id = %ctx.record.id, tier = self.name(), error = %err, "draft write failed");
            return TierOutcome::Failed(err.to_string());
        }

        for id in ctx.stale {
            if let Err(err) = self.store.delete_attachment(id).await {
                debug!(target: "offline::draft", attachment_id = %id, error = %err, "stale attachment not removed");
            }
        }
        TierOutcome::Written
    }
}

/// Best-effort metadata mirror on the remote service, only while online.
pub(crate) struct RemoteMirrorTier {
    pub mirror: Option<Arc<dyn RemoteDraftMirror>>,
}

#[async_trait]
impl DraftWriteTier for RemoteMirrorTier {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn write(&self, ctx: &WriteContext<'_>) -> TierOutcome {
        let Some(mirror) = &self.mirror else {
            return TierOutcome::Skipped("no remote mirror configured".into());
        };
        if !ctx.online {
            return TierOutcome::Skipped("offline".into());
        }
        match mirror.mirror_draft(ctx.record, ctx.credential).await {
            Ok(()) => TierOutcome::Written,
            Err(err) => {
                warn!(target: "offline::draft", draft_id = %ctx.record.id, tier = self.name(), error = %err, "remote mirror failed");
                TierOutcome::Failed(err.to_string())
            }
        }
    }
}

/// Fallback store mirror with attachments replaced by placeholders. A
/// finalized draft clears the mirror instead.
pub(crate) struct FallbackMirrorTier {
    pub fallback: Arc<dyn FallbackStore>,
}

#[async_trait]
impl DraftWriteTier for FallbackMirrorTier {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn write(&self, ctx: &WriteContext<'_>) -> TierOutcome {
        if ctx.record.status.is_finalized() {
            if let Err(err) = self.fallback.remove(DRAFT_MIRROR_KEY) {
                debug!(target: "offline::draft", error = %err, "fallback mirror not cleared");
            }
            return TierOutcome::Skipped("finalized drafts are not mirrored".into());
        }

        let mirror = DraftMirror::placeholder_of(ctx.record, ctx.now_ms);
        let full = match serde_json::to_string(&mirror) {
            Ok(full) => full,
            Err(err) => return TierOutcome::Failed(err.to_string()),
        };

        let outcome = write_with_reduction(self.fallback.as_ref(), DRAFT_MIRROR_KEY, &full, || {
            serde_json::to_string(&mirror.reduced(REDUCED_ARRAY_BYTES)).ok()
        });
        match outcome {
            MirrorWrite::Full => TierOutcome::Written,
            MirrorWrite::Reduced => TierOutcome::Reduced,
            MirrorWrite::Dropped => TierOutcome::Failed("fallback quota exhausted".into()),
        }
    }
}
