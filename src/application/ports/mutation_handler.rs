use crate::domain::entities::{BinaryAttachment, QueueItem};
use crate::shared::error::AppError;
use async_trait::async_trait;
use thiserror::Error;

/// Everything a handler needs to apply one queue item remotely.
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub item: QueueItem,
    /// Stable client-generated identity; the remote side must dedupe on it.
    pub idempotency_key: String,
    pub credential: Option<String>,
    pub attachments: Vec<BinaryAttachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationAck {
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("rejected: {0}")]
    Permanent(String),
}

impl MutationError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, MutationError::Permanent(_))
    }
}

impl From<AppError> for MutationError {
    fn from(err: AppError) -> Self {
        if err.is_transient() {
            MutationError::Transient(err.to_string())
        } else {
            MutationError::Permanent(err.to_string())
        }
    }
}

/// Applies one mutation type against the remote service. Must be idempotent
/// for a given `idempotency_key`.
#[async_trait]
pub trait MutationHandler: Send + Sync {
    async fn apply(&self, request: &MutationRequest) -> Result<MutationAck, MutationError>;
}
