use crate::shared::error::AppError;
use async_trait::async_trait;

/// Active check that the remote service is actually reachable.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> Result<(), AppError>;
}
