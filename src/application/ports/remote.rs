use crate::domain::entities::{DraftRecord, ReferenceEntities};
use crate::domain::value_objects::OwnerId;
use crate::shared::error::AppError;
use async_trait::async_trait;

/// Best-effort metadata mirror of drafts on the remote service.
#[async_trait]
pub trait RemoteDraftMirror: Send + Sync {
    /// Writes draft metadata (no binary data) keyed by the draft identity.
    async fn mirror_draft(
        &self,
        draft: &DraftRecord,
        credential: Option<&str>,
    ) -> Result<(), AppError>;
}

/// Read path for reference entities used to populate cache snapshots.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn fetch_reference_entities(
        &self,
        owner: &OwnerId,
        credential: Option<&str>,
    ) -> Result<ReferenceEntities, AppError>;
}

/// Opaque credential attached to outbound calls.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Result<Option<String>, AppError>;
}

/// Provider for engines that run without authentication.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn credential(&self) -> Result<Option<String>, AppError> {
        Ok(None)
    }
}
