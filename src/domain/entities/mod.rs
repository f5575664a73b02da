pub mod attachment;
pub mod cache_snapshot;
pub mod connectivity;
pub mod draft;
pub mod queue_item;

pub use attachment::BinaryAttachment;
pub use cache_snapshot::{
    CACHE_SNAPSHOT_VERSION, CacheSnapshot, CacheStats, ReferenceEntities, SnapshotValidity,
};
pub use connectivity::{ConnectionQuality, ConnectivityEvent, ConnectivityState, PlatformSignal};
pub use draft::{AttachmentSlot, DraftRecord, RemoteFile};
pub use queue_item::{QueueItem, QueueItemSummary, QueueRetryMetricsSnapshot, QueueStats};
