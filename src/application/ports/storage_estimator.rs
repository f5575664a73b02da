use crate::shared::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEstimate {
    pub usage_bytes: u64,
    pub quota_bytes: u64,
}

impl StorageEstimate {
    pub fn ratio(&self) -> f64 {
        self.projected_ratio(0)
    }

    /// Usage ratio after writing `extra_bytes` more.
    pub fn projected_ratio(&self, extra_bytes: u64) -> f64 {
        if self.quota_bytes == 0 {
            return 1.0;
        }
        self.usage_bytes.saturating_add(extra_bytes) as f64 / self.quota_bytes as f64
    }
}

#[async_trait]
pub trait StorageEstimator: Send + Sync {
    async fn estimate(&self) -> Result<StorageEstimate, AppError>;
}
