pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;
mod state;

pub use application::ports::{
    CredentialProvider, FallbackStore, LocalStore, MutationAck, MutationError, MutationHandler,
    MutationRequest, NoCredentials, ReachabilityProbe, ReferenceSource, RemoteDraftMirror,
};
pub use application::services::draft_service::{AttachmentInput, DraftInput, SaveDraftOutcome};
pub use application::services::{
    CacheSnapshotService, ConnectivityMonitor, DraftService, QueueEvent, SyncQueue,
};
pub use domain::entities::{ConnectivityEvent, ConnectivityState, PlatformSignal, QueueStats};
pub use domain::value_objects::{DraftId, MutationType, OwnerId, Payload};
pub use infrastructure::database::StoreHandle;
pub use infrastructure::jobs::{HousekeepingJob, HousekeepingReport};
pub use shared::{AppConfig, AppError, Clock, ManualClock, SystemClock};
pub use state::{EngineCollaborators, OfflineEngine, StartReport};

/// Installs the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync_lib=debug,offline=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
