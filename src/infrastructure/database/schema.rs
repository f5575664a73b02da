use crate::application::ports::Collection;
use crate::shared::error::AppError;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

/// Current layout version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 2;

const TABLES: [(Collection, &str); 4] = [
    (
        Collection::Drafts,
        r#"
        CREATE TABLE IF NOT EXISTS drafts (
            id TEXT PRIMARY KEY NOT NULL,
            owner_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            attachments TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL,
            auto_saved INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            synced_at INTEGER,
            remote_id TEXT
        )
        "#,
    ),
    (
        Collection::Attachments,
        r#"
        CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY NOT NULL,
            draft_id TEXT NOT NULL,
            section_index INTEGER NOT NULL,
            item_index INTEGER NOT NULL,
            mime TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            original_name TEXT NOT NULL,
            data BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    ),
    (
        Collection::Queue,
        r#"
        CREATE TABLE IF NOT EXISTS queue (
            id TEXT PRIMARY KEY NOT NULL,
            mutation_type TEXT NOT NULL,
            target_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            retries INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            next_retry INTEGER NOT NULL,
            priority INTEGER NOT NULL DEFAULT 1,
            quarantined INTEGER NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        Collection::Settings,
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    ),
];

/// Columns introduced after version 1, added in place on older stores.
const COLUMN_UPGRADES: [(&str, &str, &str); 2] = [
    ("queue", "quarantined", "INTEGER NOT NULL DEFAULT 0"),
    ("drafts", "remote_id", "TEXT"),
];

const INDEXES: [&str; 7] = [
    "CREATE INDEX IF NOT EXISTS idx_drafts_owner ON drafts(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_drafts_updated_at ON drafts(updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_attachments_draft ON attachments(draft_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_attachments_slot ON attachments(draft_id, section_index, item_index)",
    "CREATE INDEX IF NOT EXISTS idx_queue_next_retry ON queue(next_retry)",
    "CREATE INDEX IF NOT EXISTS idx_queue_priority ON queue(priority)",
    "CREATE INDEX IF NOT EXISTS idx_queue_created_at ON queue(created_at)",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    pub previous_version: i64,
    pub created_collections: Vec<Collection>,
    pub added_columns: Vec<String>,
}

impl SchemaReport {
    pub fn changed(&self) -> bool {
        !self.created_collections.is_empty()
            || !self.added_columns.is_empty()
            || self.previous_version != SCHEMA_VERSION
    }
}

/// Brings the store up to `SCHEMA_VERSION`. Only adds missing collections,
/// columns and indexes; existing rows are never touched.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<SchemaReport, AppError> {
    let previous_version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;

    let mut report = SchemaReport {
        previous_version,
        ..Default::default()
    };

    for (collection, ddl) in TABLES {
        if !table_exists(pool, collection.name()).await? {
            report.created_collections.push(collection);
        }
        sqlx::query(ddl).execute(pool).await?;
    }

    for (table, column, definition) in COLUMN_UPGRADES {
        if !column_exists(pool, table, column).await? {
            let statement = format!("ALTER TABLE {table} ADD COLUMN {column} {definition}");
            sqlx::query(&statement).execute(pool).await?;
            report.added_columns.push(format!("{table}.{column}"));
        }
    }

    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    if previous_version != SCHEMA_VERSION {
        sqlx::query(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
            .execute(pool)
            .await?;
    }

    if report.changed() {
        info!(
            target: "offline::store",
            previous_version,
            version = SCHEMA_VERSION,
            created = ?report.created_collections,
            added_columns = ?report.added_columns,
            "local store schema upgraded"
        );
    } else {
        debug!(target: "offline::store", version = SCHEMA_VERSION, "local store schema up to date");
    }

    Ok(report)
}

async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool, AppError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> Result<bool, AppError> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await?;
    for row in rows {
        let name: String = row.try_get("name")?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
