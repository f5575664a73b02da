pub mod ports;
pub mod services;

pub use services::{CacheSnapshotService, ConnectivityMonitor, DraftService, SyncQueue};
