mod mappers;
pub mod metrics;
mod rows;
pub mod sqlite_store;
pub mod storage_estimator;

pub use metrics::{QueueRetryMetrics, RetryOutcome};
pub use sqlite_store::SqliteLocalStore;
pub use storage_estimator::SqliteStorageEstimator;
