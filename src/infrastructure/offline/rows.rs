use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct DraftRow {
    pub id: String,
    pub owner_id: String,
    pub payload: String,
    pub attachments: String,
    pub status: String,
    pub auto_saved: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub synced_at: Option<i64>,
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AttachmentRow {
    pub id: String,
    pub draft_id: String,
    pub section_index: i64,
    pub item_index: i64,
    pub mime: String,
    pub size_bytes: i64,
    pub original_name: String,
    pub data: Vec<u8>,
    pub created_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct QueueRow {
    pub id: String,
    pub mutation_type: String,
    pub target_id: String,
    pub payload: String,
    pub retries: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub next_retry: i64,
    pub priority: i64,
    pub quarantined: bool,
}
