use crate::application::ports::{
    CredentialProvider, LocalStore, MutationHandler, NoCredentials, ReachabilityProbe, ReferenceSource,
    RemoteDraftMirror,
};
use crate::application::services::cache_snapshot_service::{
    CacheSnapshotConfig, CacheSnapshotDeps, CacheSnapshotService,
};
use crate::application::services::connectivity_monitor::ConnectivityMonitor;
use crate::application::services::draft_service::{
    DraftService, DraftServiceConfig, DraftServiceDeps,
};
use crate::application::services::sync_queue::SyncQueue;
use crate::domain::entities::ConnectivityState;
use crate::domain::value_objects::MutationType;
use crate::infrastructure::connectivity::HttpReachabilityProbe;
use crate::infrastructure::database::{LazyLocalStore, StoreHandle};
use crate::infrastructure::fallback::QuotaKeyValueStore;
use crate::infrastructure::jobs::{HousekeepingJob, HousekeepingReport, QueueTriggers};
use crate::infrastructure::offline::SqliteStorageEstimator;
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Collaborators supplied by the host application.
pub struct EngineCollaborators {
    /// Defaults to an HTTP probe against the configured URL.
    pub probe: Option<Arc<dyn ReachabilityProbe>>,
    pub remote_mirror: Option<Arc<dyn RemoteDraftMirror>>,
    pub reference: Option<Arc<dyn ReferenceSource>>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub handlers: Vec<(MutationType, Arc<dyn MutationHandler>)>,
    pub clock: Arc<dyn Clock>,
}

impl Default for EngineCollaborators {
    fn default() -> Self {
        Self {
            probe: None,
            remote_mirror: None,
            reference: None,
            credentials: Arc::new(NoCredentials),
            handlers: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub connectivity: ConnectivityState,
    /// The local store could not be opened; drafts and snapshots live in the
    /// fallback store until it can.
    pub degraded: bool,
    pub housekeeping: Option<HousekeepingReport>,
    pub queue_started: bool,
}

/// Every engine component wired to one local store handle.
#[derive(Clone)]
pub struct OfflineEngine {
    pub config: Arc<AppConfig>,
    pub store_handle: Arc<StoreHandle>,
    pub store: Arc<dyn LocalStore>,
    pub fallback: Arc<QuotaKeyValueStore>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub queue: Arc<SyncQueue>,
    pub drafts: Arc<DraftService>,
    pub cache: Arc<CacheSnapshotService>,
    pub housekeeping: Arc<HousekeepingJob>,
}

impl OfflineEngine {
    pub async fn new(
        config: AppConfig,
        collaborators: EngineCollaborators,
    ) -> Result<Self, AppError> {
        let handle = Arc::new(StoreHandle::new(&config.database));
        Self::with_store_handle(config, handle, collaborators).await
    }

    pub async fn with_store_handle(
        config: AppConfig,
        store_handle: Arc<StoreHandle>,
        collaborators: EngineCollaborators,
    ) -> Result<Self, AppError> {
        config.validate().map_err(AppError::ConfigurationError)?;
        let EngineCollaborators {
            probe,
            remote_mirror,
            reference,
            credentials,
            handlers,
            clock,
        } = collaborators;

        if let Err(err) = store_handle.open().await {
            warn!(error = %err, "local store unavailable, running on the fallback store");
        }
        let store: Arc<dyn LocalStore> = Arc::new(LazyLocalStore::new(Arc::clone(&store_handle)));
        let fallback = Arc::new(match config.fallback_file_path() {
            Some(path) => QuotaKeyValueStore::open(path, config.storage.fallback_quota_bytes)?,
            None => QuotaKeyValueStore::in_memory(config.storage.fallback_quota_bytes),
        });

        let probe: Arc<dyn ReachabilityProbe> = match probe {
            Some(probe) => probe,
            None => Arc::new(HttpReachabilityProbe::new(&config.connectivity)?),
        };
        let connectivity = Arc::new(ConnectivityMonitor::new(
            probe,
            Arc::clone(&clock),
            &config.connectivity,
        ));

        let queue = Arc::new(
            SyncQueue::new(store.clone(), Arc::clone(&clock), &config.sync)
                .with_credentials(Arc::clone(&credentials)),
        );
        for (mutation_type, handler) in handlers {
            queue.register_handler(mutation_type, handler);
        }

        let estimator = Arc::new(SqliteStorageEstimator::new(
            store.clone(),
            config.storage.local_quota_bytes,
        ));
        let drafts = Arc::new(DraftService::new(
            DraftServiceDeps {
                store: store.clone(),
                fallback: fallback.clone(),
                queue: Arc::clone(&queue),
                clock: Arc::clone(&clock),
                connectivity: connectivity.watch(),
                remote_mirror,
                credentials: Arc::clone(&credentials),
                estimator: estimator.clone(),
            },
            DraftServiceConfig::from_config(&config),
        ));
        let cache = Arc::new(CacheSnapshotService::new(
            CacheSnapshotDeps {
                store: store.clone(),
                fallback: fallback.clone(),
                clock: Arc::clone(&clock),
                estimator,
                reference,
                credentials,
            },
            CacheSnapshotConfig::from_config(&config),
        ));
        let housekeeping = Arc::new(HousekeepingJob::new(
            store.clone(),
            fallback.clone(),
            clock,
            Some(Arc::clone(&cache)),
            config.retention.draft_retention_ms(),
        ));

        Ok(Self {
            config: Arc::new(config),
            store_handle,
            store,
            fallback,
            connectivity,
            queue,
            drafts,
            cache,
            housekeeping,
        })
    }

    /// Adopts the platform connectivity signal, runs a housekeeping pass and
    /// starts background queue processing.
    pub async fn start(&self, platform_online: bool) -> StartReport {
        let degraded = match self.store_handle.open().await {
            Ok(_) => false,
            Err(err) => {
                warn!(error = %err, "starting in degraded mode, local store unavailable");
                true
            }
        };
        let connectivity = self.connectivity.initialize(platform_online).await;
        let housekeeping = match self.housekeeping.run_once().await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(error = %err, "startup housekeeping skipped");
                None
            }
        };
        let queue_started = self.queue.start(QueueTriggers {
            connectivity: Some(self.connectivity.watch()),
            edges: Some(self.connectivity.subscribe()),
        });

        info!(online = connectivity.is_online, queue_started, degraded, "offline engine started");
        StartReport {
            connectivity,
            degraded,
            housekeeping,
            queue_started,
        }
    }

    /// True while the local store cannot be opened.
    pub fn is_degraded(&self) -> bool {
        !self.store_handle.is_open()
    }

    pub async fn shutdown(&self) {
        self.queue.stop();
        self.store_handle.close().await;
        info!("offline engine stopped");
    }
}
