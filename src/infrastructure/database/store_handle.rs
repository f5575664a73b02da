use crate::infrastructure::database::schema::ensure_schema;
use crate::infrastructure::offline::SqliteLocalStore;
use crate::shared::config::DatabaseConfig;
use crate::shared::error::AppError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Process-wide handle to the local durable store. `open` connects and
/// migrates once; later calls return the same store.
pub struct StoreHandle {
    url: String,
    max_connections: u32,
    store: OnceCell<Arc<SqliteLocalStore>>,
}

impl StoreHandle {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections.max(1),
            store: OnceCell::new(),
        }
    }

    pub fn from_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            store: OnceCell::new(),
        }
    }

    pub async fn open(&self) -> Result<Arc<SqliteLocalStore>, AppError> {
        let store = self
            .store
            .get_or_try_init(|| async {
                let pool = connect(&self.url, self.max_connections).await?;
                ensure_schema(&pool).await?;
                info!(target: "offline::store", url = %self.url, "local store opened");
                Ok::<_, AppError>(Arc::new(SqliteLocalStore::new(pool)))
            })
            .await?;
        Ok(Arc::clone(store))
    }

    pub fn is_open(&self) -> bool {
        self.store.initialized()
    }

    pub async fn close(&self) {
        if let Some(store) = self.store.get() {
            store.pool().close().await;
        }
    }
}

async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool, AppError> {
    ensure_parent_dir(url)?;
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// SQLite creates the file but not the directory holding it.
fn ensure_parent_dir(url: &str) -> Result<(), AppError> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
