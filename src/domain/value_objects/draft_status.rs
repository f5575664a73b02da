use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a draft record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    AutoSaved,
    PendingSync,
    Synced,
    Error,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::AutoSaved => "auto_saved",
            DraftStatus::PendingSync => "pending_sync",
            DraftStatus::Synced => "synced",
            DraftStatus::Error => "error",
        }
    }

    /// Drafts still being edited; finalized or submitted records are not restorable.
    pub fn is_restorable(&self) -> bool {
        matches!(self, DraftStatus::AutoSaved | DraftStatus::Error)
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self, DraftStatus::PendingSync | DraftStatus::Synced)
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for DraftStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, String> {
        match value {
            "auto_saved" => Ok(DraftStatus::AutoSaved),
            "pending_sync" => Ok(DraftStatus::PendingSync),
            "synced" => Ok(DraftStatus::Synced),
            "error" => Ok(DraftStatus::Error),
            other => Err(format!("Unknown draft status: {other}")),
        }
    }
}
