use crate::domain::value_objects::OwnerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CACHE_SNAPSHOT_VERSION: &str = "v1";

/// Reference data readable without network access. `history` is the
/// low-value set dropped first under storage pressure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReferenceEntities {
    #[serde(default)]
    pub organizations: Vec<Value>,
    #[serde(default)]
    pub locations: Vec<Value>,
    #[serde(default)]
    pub templates: Vec<Value>,
    #[serde(default)]
    pub history: Vec<Value>,
}

impl ReferenceEntities {
    pub fn item_count(&self) -> usize {
        self.organizations.len() + self.locations.len() + self.templates.len() + self.history.len()
    }

    pub fn without_history(&self) -> ReferenceEntities {
        ReferenceEntities {
            history: Vec::new(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSnapshot {
    pub owner_id: OwnerId,
    pub entities: ReferenceEntities,
    pub timestamp: i64,
    pub version: String,
}

impl CacheSnapshot {
    pub fn new(owner_id: OwnerId, entities: ReferenceEntities, now_ms: i64) -> Self {
        Self {
            owner_id,
            entities,
            timestamp: now_ms,
            version: CACHE_SNAPSHOT_VERSION.to_string(),
        }
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp)
    }

    pub fn is_expired(&self, now_ms: i64, expiry_ms: i64) -> bool {
        self.age_ms(now_ms) > expiry_ms
    }

    /// Whether this snapshot may be served to `owner` at `now_ms`.
    pub fn validity(&self, owner: &OwnerId, now_ms: i64, expiry_ms: i64) -> SnapshotValidity {
        if &self.owner_id != owner {
            SnapshotValidity::OwnerMismatch
        } else if self.version != CACHE_SNAPSHOT_VERSION {
            SnapshotValidity::VersionMismatch
        } else if self.is_expired(now_ms, expiry_ms) {
            SnapshotValidity::Expired
        } else {
            SnapshotValidity::Valid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotValidity {
    Valid,
    OwnerMismatch,
    VersionMismatch,
    Expired,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub present: bool,
    pub organizations: usize,
    pub locations: usize,
    pub templates: usize,
    pub history: usize,
    pub age_ms: Option<i64>,
    pub expires_in_ms: Option<i64>,
    pub timestamp: Option<i64>,
}
