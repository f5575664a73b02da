use crate::application::ports::{LocalStore, StorageEstimate, StorageEstimator};
use crate::shared::error::AppError;
use async_trait::async_trait;
use std::sync::Arc;

/// Estimates headroom from the local store's page usage against a configured quota.
pub struct SqliteStorageEstimator {
    store: Arc<dyn LocalStore>,
    quota_bytes: u64,
}

impl SqliteStorageEstimator {
    pub fn new(store: Arc<dyn LocalStore>, quota_bytes: u64) -> Self {
        Self { store, quota_bytes }
    }
}

#[async_trait]
impl StorageEstimator for SqliteStorageEstimator {
    async fn estimate(&self) -> Result<StorageEstimate, AppError> {
        Ok(StorageEstimate {
            usage_bytes: self.store.storage_usage_bytes().await?,
            quota_bytes: self.quota_bytes,
        })
    }
}
