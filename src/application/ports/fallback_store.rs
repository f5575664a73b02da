use crate::shared::error::AppError;

/// Synchronous, string-keyed fallback store with a strict byte quota.
pub trait FallbackStore: Send + Sync {
    /// Fails with `AppError::QuotaExceeded` when the write does not fit; the
    /// previous value under `key` is then left untouched.
    fn set(&self, key: &str, value: &str) -> Result<(), AppError>;

    fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    fn remove(&self, key: &str) -> Result<(), AppError>;

    fn usage_bytes(&self) -> u64;

    fn quota_bytes(&self) -> u64;
}
