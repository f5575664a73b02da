use crate::application::ports::FallbackStore;
use serde::Serialize;
use tracing::{debug, warn};

/// How much of a mirrored value made it into the fallback store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorWrite {
    Full,
    Reduced,
    Dropped,
}

/// Writes `full` under `key`. On quota failure retries once with the value
/// produced by `reduce`, then gives up. Never fails.
pub fn write_with_reduction<F>(
    store: &dyn FallbackStore,
    key: &str,
    full: &str,
    reduce: F,
) -> MirrorWrite
where
    F: FnOnce() -> Option<String>,
{
    match store.set(key, full) {
        Ok(()) => return MirrorWrite::Full,
        Err(err) if err.is_quota_exceeded() => {
            debug!(target: "offline::fallback", key, error = %err, "full mirror does not fit, reducing");
        }
        Err(err) => {
            warn!(target: "offline::fallback", key, error = %err, "fallback write failed");
            return MirrorWrite::Dropped;
        }
    }

    let Some(reduced) = reduce() else {
        warn!(target: "offline::fallback", key, "no reduced mirror available, dropping write");
        return MirrorWrite::Dropped;
    };
    match store.set(key, &reduced) {
        Ok(()) => MirrorWrite::Reduced,
        Err(err) => {
            warn!(target: "offline::fallback", key, error = %err, "reduced mirror dropped");
            MirrorWrite::Dropped
        }
    }
}
