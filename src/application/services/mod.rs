pub mod cache_snapshot_service;
pub mod connectivity_monitor;
pub mod draft_service;
pub mod fallback_mirror;
pub mod sync_queue;

pub use cache_snapshot_service::{CacheSaveReport, CacheSnapshotService};
pub use connectivity_monitor::ConnectivityMonitor;
pub use draft_service::{DraftService, DraftInput, SaveDraftOutcome, SaveReport};
pub use sync_queue::{QueueEvent, SyncQueue};
