mod attachments;
mod sources;
#[cfg(test)]
mod tests;
mod tiers;

pub use attachments::{AttachmentInput, AttachmentSource};
pub use tiers::{TierOutcome, TierReport};

use crate::application::ports::{
    CredentialProvider, FallbackStore, LocalStore, RemoteDraftMirror, StorageEstimator,
};
use crate::application::services::sync_queue::SyncQueue;
use crate::domain::entities::{
    AttachmentSlot, BinaryAttachment, ConnectivityState, DraftRecord,
};
use crate::domain::value_objects::{
    DraftId, DraftStatus, KeyRange, MutationType, OwnerId, Payload, QueueItemId,
};
use crate::shared::clock::Clock;
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use attachments::plan_attachments;
use serde::{Deserialize, Serialize};
use sources::{DraftReadSource, DurableDraftSource, FallbackDraftSource, SourceRead};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tiers::{DraftWriteTier, DurableDraftTier, FallbackMirrorTier, RemoteMirrorTier, WriteContext};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Fallback store key holding the reduced draft mirror.
pub const DRAFT_MIRROR_KEY: &str = "draft_autosave";

/// Reduced copy of a draft kept in the fallback store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DraftMirror {
    pub record: DraftRecord,
    pub saved_at: i64,
    pub content_hash: String,
}

impl DraftMirror {
    fn placeholder_of(record: &DraftRecord, now_ms: i64) -> Self {
        let mut record = record.clone();
        record.attachments = record
            .attachments
            .iter()
            .map(AttachmentSlot::to_placeholder)
            .collect();
        Self {
            content_hash: record.payload.content_hash(),
            record,
            saved_at: now_ms,
        }
    }

    /// Drops large payload arrays and every attachment slot. The hash keeps
    /// describing the full payload.
    fn reduced(&self, max_array_bytes: usize) -> Self {
        let mut record = self.record.clone();
        record.payload = record.payload.without_large_arrays(max_array_bytes);
        record.attachments.clear();
        Self {
            record,
            saved_at: self.saved_at,
            content_hash: self.content_hash.clone(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[derive(Debug, Clone)]
pub struct DraftInput {
    /// `None` starts a new draft.
    pub draft_id: Option<DraftId>,
    pub payload: Payload,
    /// Full slot state of the draft after this save.
    pub attachments: Vec<AttachmentInput>,
    pub finalize: bool,
}

impl DraftInput {
    pub fn new(draft_id: Option<DraftId>, payload: Payload) -> Self {
        Self {
            draft_id,
            payload,
            attachments: Vec::new(),
            finalize: false,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<AttachmentInput>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn finalized(mut self) -> Self {
        self.finalize = true;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveReport {
    pub draft_id: DraftId,
    pub status: DraftStatus,
    pub updated_at: i64,
    pub tiers: Vec<TierReport>,
    pub queue_item: Option<QueueItemId>,
    pub stored_attachments: usize,
    pub removed_attachments: usize,
}

impl SaveReport {
    pub fn tier(&self, name: &str) -> Option<&TierOutcome> {
        self.tiers
            .iter()
            .find(|report| report.tier == name)
            .map(|report| &report.outcome)
    }

    /// The local store missed this save and only the fallback mirror holds it.
    pub fn degraded(&self) -> bool {
        self.tier("durable").map_or(true, |outcome| !outcome.persisted())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SaveDraftOutcome {
    Saved(SaveReport),
    /// Another save was in flight; this one was dropped.
    AlreadySaving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftSource {
    Durable,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct RestoredDraft {
    pub record: DraftRecord,
    pub attachments: Vec<BinaryAttachment>,
    /// Slots whose blob could not be found anywhere.
    pub unresolved: Vec<AttachmentSlot>,
    pub source: DraftSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastSaveInfo {
    pub draft_id: DraftId,
    pub owner_id: OwnerId,
    pub status: DraftStatus,
    pub saved_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageLimitStatus {
    pub pending_drafts: u32,
    pub max_pending_drafts: u32,
    pub usage_bytes: u64,
    pub quota_bytes: u64,
    pub within_limit: bool,
}

/// Payload handed to the queue on finalize.
#[derive(Debug, Serialize)]
struct FinalizedRecord<'a> {
    record: &'a DraftRecord,
    finalized_at: i64,
}

#[derive(Debug, Clone)]
pub struct DraftServiceConfig {
    pub finalize_priority: i64,
    pub recent_autosave_ms: i64,
    pub max_pending_drafts: u32,
    pub quota_threshold: f64,
}

impl DraftServiceConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            finalize_priority: config.sync.finalize_priority,
            recent_autosave_ms: config.retention.recent_autosave_ms(),
            max_pending_drafts: config.storage.max_pending_drafts,
            quota_threshold: config.storage.quota_threshold,
        }
    }
}

impl Default for DraftServiceConfig {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

pub struct DraftServiceDeps {
    pub store: Arc<dyn LocalStore>,
    pub fallback: Arc<dyn FallbackStore>,
    pub queue: Arc<SyncQueue>,
    pub clock: Arc<dyn Clock>,
    pub connectivity: watch::Receiver<ConnectivityState>,
    pub remote_mirror: Option<Arc<dyn RemoteDraftMirror>>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub estimator: Arc<dyn StorageEstimator>,
}

struct SavingGuard<'a>(&'a AtomicBool);

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Auto-save and restore of in-progress drafts across the local store, the
/// remote mirror and the fallback mirror.
pub struct DraftService {
    store: Arc<dyn LocalStore>,
    fallback: Arc<dyn FallbackStore>,
    queue: Arc<SyncQueue>,
    clock: Arc<dyn Clock>,
    connectivity: watch::Receiver<ConnectivityState>,
    credentials: Arc<dyn CredentialProvider>,
    estimator: Arc<dyn StorageEstimator>,
    has_remote_mirror: bool,
    tiers: Vec<Box<dyn DraftWriteTier>>,
    sources: Vec<Box<dyn DraftReadSource>>,
    config: DraftServiceConfig,
    saving: AtomicBool,
}

impl DraftService {
    pub fn new(deps: DraftServiceDeps, config: DraftServiceConfig) -> Self {
        let has_remote_mirror = deps.remote_mirror.is_some();
        let tiers: Vec<Box<dyn DraftWriteTier>> = vec![
            Box::new(DurableDraftTier {
                store: Arc::clone(&deps.store),
            }),
            Box::new(RemoteMirrorTier {
                mirror: deps.remote_mirror,
            }),
            Box::new(FallbackMirrorTier {
                fallback: Arc::clone(&deps.fallback),
            }),
        ];
        let sources: Vec<Box<dyn DraftReadSource>> = vec![
            Box::new(DurableDraftSource {
                store: Arc::clone(&deps.store),
            }),
            Box::new(FallbackDraftSource {
                fallback: Arc::clone(&deps.fallback),
                store: Arc::clone(&deps.store),
            }),
        ];

        Self {
            store: deps.store,
            fallback: deps.fallback,
            queue: deps.queue,
            clock: deps.clock,
            connectivity: deps.connectivity,
            credentials: deps.credentials,
            estimator: deps.estimator,
            has_remote_mirror,
            tiers,
            sources,
            config,
            saving: AtomicBool::new(false),
        }
    }

    /// Persists the draft through every write tier. Only a finalize request
    /// produces a queue item. A call made while another save is running is
    /// dropped and reported as `AlreadySaving`.
    pub async fn save_draft(
        &self,
        owner: &OwnerId,
        input: DraftInput,
    ) -> Result<SaveDraftOutcome, AppError> {
        if self
            .saving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(target: "offline::draft", owner_id = %owner, "save already in flight, dropping");
            return Ok(SaveDraftOutcome::AlreadySaving);
        }
        let _guard = SavingGuard(&self.saving);

        self.save_exclusive(owner, input)
            .await
            .map(SaveDraftOutcome::Saved)
    }

    async fn save_exclusive(
        &self,
        owner: &OwnerId,
        input: DraftInput,
    ) -> Result<SaveReport, AppError> {
        let now = self.clock.now_ms();
        let finalize = input.finalize;
        let draft_id = input.draft_id.unwrap_or_else(DraftId::generate);

        // An unreachable local store still leaves the fallback tier.
        let existing = match self.store.get_draft(&draft_id).await {
            Ok(existing) => existing,
            Err(err) => {
                warn!(target: "offline::draft", draft_id = %draft_id, error = %err, "existing draft unreadable");
                None
            }
        };
        let stored_blobs = match existing {
            Some(_) => self
                .store
                .attachments_for_draft(&draft_id)
                .await
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let mut record = match existing {
            Some(record) if &record.owner_id != owner => {
                return Err(AppError::ValidationError(format!(
                    "draft {draft_id} belongs to another owner"
                )));
            }
            Some(record) if record.status.is_finalized() => {
                return Err(AppError::ValidationError(format!(
                    "draft {draft_id} is already {}",
                    record.status
                )));
            }
            Some(mut record) => {
                record.payload = input.payload;
                record.mark_auto_saved(now);
                record
            }
            None => DraftRecord::new(draft_id.clone(), owner.clone(), input.payload, now),
        };

        let plan = plan_attachments(&record.id, &stored_blobs, input.attachments, now);
        record.attachments = plan.slots.clone();
        if finalize {
            record.mark_pending_sync(now);
        }

        let online = self.connectivity.borrow().is_online;
        let credential = if online && self.has_remote_mirror {
            self.credentials.credential().await.unwrap_or_else(|err| {
                debug!(target: "offline::draft", error = %err, "no credential for remote mirror");
                None
            })
        } else {
            None
        };

        let blobs = plan.blobs_to_write();
        let ctx = WriteContext {
            record: &record,
            blobs: &blobs,
            stale: &plan.stale,
            online,
            credential: credential.as_deref(),
            now_ms: now,
        };
        let mut tiers = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            let outcome = tier.write(&ctx).await;
            debug!(target: "offline::draft", draft_id = %record.id, tier = tier.name(), ?outcome, "tier written");
            if finalize && tier.required_for_finalize() && !outcome.persisted() {
                return Err(AppError::Storage(format!(
                    "finalize of draft {} needs the {} tier: {outcome:?}",
                    record.id,
                    tier.name()
                )));
            }
            tiers.push(TierReport {
                tier: tier.name(),
                outcome,
            });
        }

        let persisted_locally = tiers
            .iter()
            .any(|report| report.tier != "remote" && report.outcome.persisted());
        if !persisted_locally {
            warn!(target: "offline::draft", draft_id = %record.id, owner_id = %owner, "draft not persisted to any local tier");
            return Err(AppError::Storage(format!(
                "draft {} could not be persisted locally",
                record.id
            )));
        }

        let queue_item = if finalize {
            Some(self.hand_to_queue(&mut record, now).await?)
        } else {
            None
        };

        let report = SaveReport {
            draft_id: record.id.clone(),
            status: record.status,
            updated_at: record.updated_at,
            tiers,
            queue_item,
            stored_attachments: plan.new_blobs.len(),
            removed_attachments: plan.stale.len(),
        };
        if report.degraded() {
            warn!(target: "offline::draft", draft_id = %report.draft_id, "draft saved to fallback mirror only");
        } else {
            info!(
                target: "offline::draft",
                draft_id = %report.draft_id,
                owner_id = %owner,
                status = %report.status,
                finalize,
                "draft saved"
            );
        }
        Ok(report)
    }

    async fn hand_to_queue(
        &self,
        record: &mut DraftRecord,
        now: i64,
    ) -> Result<QueueItemId, AppError> {
        let value = serde_json::to_value(FinalizedRecord {
            record: &*record,
            finalized_at: now,
        })?;
        let payload = Payload::new(value).map_err(AppError::SerializationError)?;

        match self
            .queue
            .enqueue(
                MutationType::CreateRecord,
                record.id.to_string(),
                payload,
                self.config.finalize_priority,
            )
            .await
        {
            Ok(id) => Ok(id),
            Err(err) => {
                warn!(target: "offline::draft", draft_id = %record.id, error = %err, "finalized draft not queued");
                record.mark_error(self.clock.now_ms());
                if let Err(put_err) = self.store.put_draft(record).await {
                    debug!(target: "offline::draft", draft_id = %record.id, error = %put_err, "error status not persisted");
                }
                Err(err)
            }
        }
    }

    /// Most recent unfinished draft of `owner`, local store first.
    pub async fn restore_draft(&self, owner: &OwnerId) -> Option<RestoredDraft> {
        for source in &self.sources {
            match source.read(owner).await {
                SourceRead::Found(restored) => {
                    info!(
                        target: "offline::draft",
                        owner_id = %owner,
                        draft_id = %restored.record.id,
                        source = ?restored.source,
                        unresolved = restored.unresolved.len(),
                        "draft restored"
                    );
                    return Some(restored);
                }
                SourceRead::Absent => {}
                SourceRead::Failed(reason) => {
                    warn!(target: "offline::draft", owner_id = %owner, source = ?source.source(), reason = %reason, "restore source failed");
                }
            }
        }
        None
    }

    /// Deletes a draft from the local store and clears a matching mirror.
    pub async fn discard_draft(&self, owner: &OwnerId, draft_id: &DraftId) -> Result<bool, AppError> {
        if let Some(record) = self.store.get_draft(draft_id).await? {
            if &record.owner_id != owner {
                return Err(AppError::ValidationError(format!(
                    "draft {draft_id} belongs to another owner"
                )));
            }
        }
        let deleted = self.store.delete_draft(draft_id).await?;

        let mirrored = self
            .read_mirror()
            .is_some_and(|mirror| &mirror.record.id == draft_id);
        if mirrored {
            self.fallback.remove(DRAFT_MIRROR_KEY)?;
        }

        info!(target: "offline::draft", draft_id = %draft_id, deleted, mirrored, "draft discarded");
        Ok(deleted || mirrored)
    }

    /// Whether an unfinished draft of `owner` was saved inside the recent window.
    pub async fn has_recent_autosave(&self, owner: &OwnerId) -> bool {
        let now = self.clock.now_ms();
        let window = self.config.recent_autosave_ms;

        if let Some(mirror) = self.read_mirror() {
            if &mirror.record.owner_id == owner
                && mirror.record.status.is_restorable()
                && now.saturating_sub(mirror.saved_at) <= window
            {
                return true;
            }
        }

        match self.store.drafts_by_owner(owner).await {
            Ok(drafts) => drafts
                .iter()
                .filter(|draft| draft.status.is_restorable())
                .any(|draft| draft.age_ms(now) <= window),
            Err(err) => {
                debug!(target: "offline::draft", owner_id = %owner, error = %err, "recent autosave check failed");
                false
            }
        }
    }

    pub fn last_save_info(&self) -> Option<LastSaveInfo> {
        self.read_mirror().map(|mirror| LastSaveInfo {
            draft_id: mirror.record.id,
            owner_id: mirror.record.owner_id,
            status: mirror.record.status,
            saved_at: mirror.saved_at,
        })
    }

    /// Compares `payload` against the last persisted version of the draft.
    pub async fn has_unsaved_changes(&self, draft_id: &DraftId, payload: &Payload) -> bool {
        let hash = payload.content_hash();
        match self.store.get_draft(draft_id).await {
            Ok(Some(record)) => return record.payload.content_hash() != hash,
            Ok(None) => {}
            Err(err) => {
                debug!(target: "offline::draft", draft_id = %draft_id, error = %err, "comparing against mirror");
            }
        }
        match self.read_mirror() {
            Some(mirror) if &mirror.record.id == draft_id => mirror.content_hash != hash,
            _ => true,
        }
    }

    pub async fn check_storage_limit(&self) -> Result<StorageLimitStatus, AppError> {
        let pending = self
            .store
            .drafts_by_updated_at(KeyRange::all())
            .await?
            .iter()
            .filter(|draft| draft.status != DraftStatus::Synced)
            .count();
        let pending_drafts = u32::try_from(pending).unwrap_or(u32::MAX);
        let estimate = self.estimator.estimate().await?;

        let within_limit = pending_drafts < self.config.max_pending_drafts
            && estimate.ratio() < self.config.quota_threshold;
        if !within_limit {
            warn!(
                target: "offline::draft",
                pending_drafts,
                usage_bytes = estimate.usage_bytes,
                quota_bytes = estimate.quota_bytes,
                "draft storage limit reached"
            );
        }
        Ok(StorageLimitStatus {
            pending_drafts,
            max_pending_drafts: self.config.max_pending_drafts,
            usage_bytes: estimate.usage_bytes,
            quota_bytes: estimate.quota_bytes,
            within_limit,
        })
    }

    fn read_mirror(&self) -> Option<DraftMirror> {
        let raw = self.fallback.get(DRAFT_MIRROR_KEY).ok().flatten()?;
        match DraftMirror::parse(&raw) {
            Ok(mirror) => Some(mirror),
            Err(err) => {
                debug!(target: "offline::draft", error = %err, "ignoring unreadable draft mirror");
                None
            }
        }
    }
}
