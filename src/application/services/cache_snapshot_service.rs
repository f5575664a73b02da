use crate::application::ports::{
    CredentialProvider, FallbackStore, LocalStore, ReferenceSource, StorageEstimator,
};
use crate::application::services::fallback_mirror::{MirrorWrite, write_with_reduction};
use crate::domain::entities::{CacheSnapshot, CacheStats, ReferenceEntities, SnapshotValidity};
use crate::domain::value_objects::OwnerId;
use crate::shared::clock::Clock;
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key of the snapshot in both the settings collection and the fallback store.
pub const CACHE_SNAPSHOT_KEY: &str = "complete_cache";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheSaveReport {
    pub stored_locally: bool,
    pub mirror: MirrorWrite,
    pub history_truncated: bool,
    pub item_count: usize,
}

#[derive(Debug, Clone)]
pub struct CacheSnapshotConfig {
    pub expiry_ms: i64,
    /// Usage ratio above which history is dropped before writing.
    pub quota_threshold: f64,
}

impl CacheSnapshotConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            expiry_ms: config.retention.cache_expiry_ms(),
            quota_threshold: config.storage.quota_threshold,
        }
    }
}

impl Default for CacheSnapshotConfig {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

pub struct CacheSnapshotDeps {
    pub store: Arc<dyn LocalStore>,
    pub fallback: Arc<dyn FallbackStore>,
    pub clock: Arc<dyn Clock>,
    pub estimator: Arc<dyn StorageEstimator>,
    pub reference: Option<Arc<dyn ReferenceSource>>,
    pub credentials: Arc<dyn CredentialProvider>,
}

/// Offline copy of the reference data one owner needs.
pub struct CacheSnapshotService {
    store: Arc<dyn LocalStore>,
    fallback: Arc<dyn FallbackStore>,
    clock: Arc<dyn Clock>,
    estimator: Arc<dyn StorageEstimator>,
    reference: Option<Arc<dyn ReferenceSource>>,
    credentials: Arc<dyn CredentialProvider>,
    config: CacheSnapshotConfig,
}

impl CacheSnapshotService {
    pub fn new(deps: CacheSnapshotDeps, config: CacheSnapshotConfig) -> Self {
        Self {
            store: deps.store,
            fallback: deps.fallback,
            clock: deps.clock,
            estimator: deps.estimator,
            reference: deps.reference,
            credentials: deps.credentials,
            config,
        }
    }

    /// Writes the snapshot to the local store and mirrors it to the fallback
    /// store. Fails only when neither write landed.
    pub async fn save(
        &self,
        owner: &OwnerId,
        entities: ReferenceEntities,
    ) -> Result<CacheSaveReport, AppError> {
        let mut snapshot = CacheSnapshot::new(owner.clone(), entities, self.clock.now_ms());
        let full_size = serde_json::to_vec(&snapshot)?.len() as u64;

        let mut history_truncated = false;
        match self.estimator.estimate().await {
            Ok(estimate) if estimate.projected_ratio(full_size) > self.config.quota_threshold => {
                warn!(
                    target: "offline::cache",
                    owner_id = %owner,
                    usage_bytes = estimate.usage_bytes,
                    quota_bytes = estimate.quota_bytes,
                    dropped = snapshot.entities.history.len(),
                    "storage nearly full, dropping cached history"
                );
                snapshot.entities = snapshot.entities.without_history();
                history_truncated = true;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(target: "offline::cache", error = %err, "no storage estimate, writing as is");
            }
        }

        let stored_locally = match self
            .store
            .put_setting(CACHE_SNAPSHOT_KEY, &serde_json::to_value(&snapshot)?)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "offline::cache", owner_id = %owner, error = %err, "snapshot not stored locally");
                false
            }
        };

        let full = serde_json::to_string(&snapshot)?;
        let mirror = write_with_reduction(self.fallback.as_ref(), CACHE_SNAPSHOT_KEY, &full, || {
            if snapshot.entities.history.is_empty() {
                return None;
            }
            let reduced = CacheSnapshot {
                entities: snapshot.entities.without_history(),
                ..snapshot.clone()
            };
            serde_json::to_string(&reduced).ok()
        });

        if !stored_locally && mirror == MirrorWrite::Dropped {
            return Err(AppError::Storage(format!(
                "cache snapshot for {owner} could not be stored"
            )));
        }

        let report = CacheSaveReport {
            stored_locally,
            mirror,
            history_truncated,
            item_count: snapshot.entities.item_count(),
        };
        info!(
            target: "offline::cache",
            owner_id = %owner,
            items = report.item_count,
            stored_locally,
            mirror = ?mirror,
            "cache snapshot saved"
        );
        Ok(report)
    }

    /// The snapshot for `owner` if one is valid. Invalid copies are purged
    /// from whichever store held them.
    pub async fn load(&self, owner: &OwnerId) -> Option<CacheSnapshot> {
        let now = self.clock.now_ms();

        match self.store.get_setting(CACHE_SNAPSHOT_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<CacheSnapshot>(value) {
                Ok(snapshot) => match snapshot.validity(owner, now, self.config.expiry_ms) {
                    SnapshotValidity::Valid => return Some(snapshot),
                    invalid => {
                        info!(target: "offline::cache", owner_id = %owner, ?invalid, "purging local snapshot");
                        self.purge_local().await;
                    }
                },
                Err(err) => {
                    warn!(target: "offline::cache", error = %err, "unreadable local snapshot");
                    self.purge_local().await;
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(target: "offline::cache", error = %err, "local snapshot unavailable, trying fallback");
            }
        }

        let raw = match self.fallback.get(CACHE_SNAPSHOT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(target: "offline::cache", error = %err, "fallback snapshot unavailable");
                return None;
            }
        };
        let validity = serde_json::from_str::<CacheSnapshot>(&raw)
            .map(|snapshot| {
                let validity = snapshot.validity(owner, now, self.config.expiry_ms);
                (snapshot, validity)
            });
        match validity {
            Ok((snapshot, SnapshotValidity::Valid)) => {
                debug!(target: "offline::cache", owner_id = %owner, "snapshot served from fallback");
                Some(snapshot)
            }
            Ok((_, invalid)) => {
                info!(target: "offline::cache", owner_id = %owner, ?invalid, "purging fallback snapshot");
                self.purge_fallback();
                None
            }
            Err(err) => {
                warn!(target: "offline::cache", error = %err, "unreadable fallback snapshot");
                self.purge_fallback();
                None
            }
        }
    }

    /// Removes the snapshot from both stores.
    pub async fn invalidate(&self) -> Result<(), AppError> {
        let local = self.store.delete_setting(CACHE_SNAPSHOT_KEY).await;
        let mirror = self.fallback.remove(CACHE_SNAPSHOT_KEY);
        info!(target: "offline::cache", "cache snapshot invalidated");
        local?;
        mirror
    }

    pub async fn stats(&self, owner: &OwnerId) -> CacheStats {
        let now = self.clock.now_ms();
        match self.load(owner).await {
            Some(snapshot) => {
                let age = snapshot.age_ms(now);
                CacheStats {
                    present: true,
                    organizations: snapshot.entities.organizations.len(),
                    locations: snapshot.entities.locations.len(),
                    templates: snapshot.entities.templates.len(),
                    history: snapshot.entities.history.len(),
                    age_ms: Some(age),
                    expires_in_ms: Some(self.config.expiry_ms.saturating_sub(age)),
                    timestamp: Some(snapshot.timestamp),
                }
            }
            None => CacheStats::default(),
        }
    }

    pub async fn has_cache(&self, owner: &OwnerId) -> bool {
        self.load(owner).await.is_some()
    }

    /// Fetches fresh reference data and replaces the snapshot. The old
    /// snapshot survives a failed fetch.
    pub async fn refresh(&self, owner: &OwnerId) -> Result<CacheSaveReport, AppError> {
        let reference = self.reference.as_ref().ok_or_else(|| {
            AppError::ConfigurationError("no reference source configured".into())
        })?;
        let credential = self.credentials.credential().await?;
        let entities = reference
            .fetch_reference_entities(owner, credential.as_deref())
            .await?;

        if let Err(err) = self.invalidate().await {
            debug!(target: "offline::cache", error = %err, "stale snapshot not fully removed");
        }
        self.save(owner, entities).await
    }

    /// Removes expired snapshots. Returns how many copies were purged.
    pub async fn purge_expired(&self) -> u32 {
        let now = self.clock.now_ms();
        let mut purged = 0;

        if let Ok(Some(value)) = self.store.get_setting(CACHE_SNAPSHOT_KEY).await {
            let expired = serde_json::from_value::<CacheSnapshot>(value)
                .map_or(true, |snapshot| snapshot.is_expired(now, self.config.expiry_ms));
            if expired {
                self.purge_local().await;
                purged += 1;
            }
        }
        if let Ok(Some(raw)) = self.fallback.get(CACHE_SNAPSHOT_KEY) {
            let expired = serde_json::from_str::<CacheSnapshot>(&raw)
                .map_or(true, |snapshot| snapshot.is_expired(now, self.config.expiry_ms));
            if expired {
                self.purge_fallback();
                purged += 1;
            }
        }
        purged
    }

    async fn purge_local(&self) {
        if let Err(err) = self.store.delete_setting(CACHE_SNAPSHOT_KEY).await {
            warn!(target: "offline::cache", error = %err, "local snapshot not purged");
        }
    }

    fn purge_fallback(&self) {
        if let Err(err) = self.fallback.remove(CACHE_SNAPSHOT_KEY) {
            warn!(target: "offline::cache", error = %err, "fallback snapshot not purged");
        }
    }
}
