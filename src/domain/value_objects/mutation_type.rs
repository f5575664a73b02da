use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag identifying which remote operation a queue item performs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationType {
    CreateRecord,
    UpdateRecord,
    UploadAttachment,
    Custom(String),
}

impl MutationType {
    pub fn as_str(&self) -> &str {
        match self {
            MutationType::CreateRecord => "create_record",
            MutationType::UpdateRecord => "update_record",
            MutationType::UploadAttachment => "upload_attachment",
            MutationType::Custom(value) => value.as_str(),
        }
    }

    /// Whether the handler needs the target record's binary attachments.
    pub fn carries_attachments(&self) -> bool {
        matches!(
            self,
            MutationType::CreateRecord | MutationType::UpdateRecord
        )
    }

    /// Whether a successful application marks the target draft as synced.
    pub fn settles_draft(&self) -> bool {
        self.carries_attachments()
    }
}

impl fmt::Display for MutationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for MutationType {
    fn from(value: &str) -> Self {
        match value {
            "create_record" => MutationType::CreateRecord,
            "update_record" => MutationType::UpdateRecord,
            "upload_attachment" => MutationType::UploadAttachment,
            other => MutationType::Custom(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_and_custom_tags() {
        for tag in ["create_record", "update_record", "upload_attachment", "close_audit"] {
            assert_eq!(MutationType::from(tag).as_str(), tag);
        }
        assert_eq!(
            MutationType::from("close_audit"),
            MutationType::Custom("close_audit".into())
        );
    }
}
