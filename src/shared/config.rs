use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub connectivity: ConnectivityConfig,
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub max_retries: u32,
    pub backoff_schedule_secs: Vec<u64>,
    pub interval_secs: u64,
    pub quarantine_permanent_errors: bool,
    pub finalize_priority: i64,
    pub attachment_priority: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    pub probe_url: String,
    pub probe_timeout_ms: u64,
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    pub fallback_quota_bytes: u64,
    #[serde(default)]
    pub fallback_file: Option<String>,
    pub local_quota_bytes: u64,
    pub quota_threshold: f64,
    pub max_pending_drafts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub draft_retention_days: u64,
    pub cache_expiry_days: u64,
    pub recent_autosave_hours: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/fieldsync.db?mode=rwc".to_string(),
                max_connections: 5,
            },
            sync: SyncConfig::default(),
            connectivity: ConnectivityConfig::default(),
            storage: StorageConfig {
                data_dir: default_data_dir(),
                fallback_quota_bytes: 5 * 1024 * 1024, // 5MB
                fallback_file: None,
                local_quota_bytes: 3 * 1024 * 1024 * 1024, // 3GB
                quota_threshold: 0.9,
                max_pending_drafts: 20,
            },
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_schedule_secs: vec![10, 30, 60, 120, 300],
            interval_secs: 30,
            quarantine_permanent_errors: true,
            finalize_priority: 1,
            attachment_priority: 2,
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: "https://www.google.com/favicon.ico".to_string(),
            probe_timeout_ms: 3_000,
            debounce_ms: 10_000,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            draft_retention_days: 7,
            cache_expiry_days: 7,
            recent_autosave_hours: 24,
        }
    }
}

impl SyncConfig {
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        self.backoff_schedule_secs
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ConnectivityConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl RetentionConfig {
    pub fn draft_retention_ms(&self) -> i64 {
        days_to_ms(self.draft_retention_days)
    }

    pub fn cache_expiry_ms(&self) -> i64 {
        days_to_ms(self.cache_expiry_days)
    }

    pub fn recent_autosave_ms(&self) -> i64 {
        i64::try_from(self.recent_autosave_hours)
            .unwrap_or(i64::MAX)
            .saturating_mul(60 * 60 * 1000)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("FIELDSYNC_DATABASE_URL") {
            if !v.trim().is_empty() {
                cfg.database.url = v.trim().to_string();
            }
        }
        if let Some(value) = env_u64("FIELDSYNC_DATABASE_MAX_CONNECTIONS") {
            cfg.database.max_connections = value.clamp(1, u64::from(u32::MAX)) as u32;
        }

        if let Some(value) = env_u64("FIELDSYNC_SYNC_MAX_RETRIES") {
            cfg.sync.max_retries = value.clamp(1, 100) as u32;
        }
        if let Ok(v) = std::env::var("FIELDSYNC_SYNC_BACKOFF_SECS") {
            let schedule: Vec<u64> = v.split(',').filter_map(parse_u64).collect();
            if !schedule.is_empty() {
                cfg.sync.backoff_schedule_secs = schedule;
            }
        }
        if let Some(value) = env_u64("FIELDSYNC_SYNC_INTERVAL_SECS") {
            cfg.sync.interval_secs = value.max(1);
        }
        if let Ok(v) = std::env::var("FIELDSYNC_SYNC_QUARANTINE_PERMANENT") {
            cfg.sync.quarantine_permanent_errors =
                parse_bool(&v, cfg.sync.quarantine_permanent_errors);
        }

        if let Ok(v) = std::env::var("FIELDSYNC_PROBE_URL") {
            if !v.trim().is_empty() {
                cfg.connectivity.probe_url = v.trim().to_string();
            }
        }
        if let Some(value) = env_u64("FIELDSYNC_PROBE_TIMEOUT_MS") {
            cfg.connectivity.probe_timeout_ms = value.max(1);
        }
        if let Some(value) = env_u64("FIELDSYNC_ONLINE_DEBOUNCE_MS") {
            cfg.connectivity.debounce_ms = value;
        }

        if let Ok(v) = std::env::var("FIELDSYNC_DATA_DIR") {
            if !v.trim().is_empty() {
                cfg.storage.data_dir = v.trim().to_string();
            }
        }
        if let Some(value) = env_u64("FIELDSYNC_FALLBACK_QUOTA_BYTES") {
            cfg.storage.fallback_quota_bytes = value;
        }
        if let Ok(v) = std::env::var("FIELDSYNC_FALLBACK_FILE") {
            cfg.storage.fallback_file = Some(v.trim().to_string()).filter(|s| !s.is_empty());
        }
        if let Some(value) = env_u64("FIELDSYNC_LOCAL_QUOTA_BYTES") {
            cfg.storage.local_quota_bytes = value;
        }

        if let Some(value) = env_u64("FIELDSYNC_DRAFT_RETENTION_DAYS") {
            cfg.retention.draft_retention_days = value.max(1);
        }
        if let Some(value) = env_u64("FIELDSYNC_CACHE_EXPIRY_DAYS") {
            cfg.retention.cache_expiry_days = value.max(1);
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.sync.max_retries == 0 {
            return Err("Sync max_retries must be greater than 0".to_string());
        }
        if self.sync.backoff_schedule_secs.is_empty() {
            return Err("Sync backoff schedule must not be empty".to_string());
        }
        if self.sync.interval_secs == 0 {
            return Err("Sync interval_secs must be greater than 0".to_string());
        }
        if self.connectivity.probe_timeout_ms == 0 {
            return Err("Connectivity probe_timeout_ms must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.storage.quota_threshold) {
            return Err("Storage quota_threshold must be between 0 and 1".to_string());
        }
        if self.retention.draft_retention_days == 0 || self.retention.cache_expiry_days == 0 {
            return Err("Retention windows must be at least one day".to_string());
        }
        Ok(())
    }

    /// Path of the JSON file backing the fallback store, if persistence is enabled.
    pub fn fallback_file_path(&self) -> Option<PathBuf> {
        self.storage.fallback_file.as_ref().map(|file| {
            let path = PathBuf::from(file);
            if path.is_absolute() {
                path
            } else {
                PathBuf::from(&self.storage.data_dir).join(path)
            }
        })
    }
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|dir| dir.join("fieldsync"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .into_owned()
}

fn days_to_ms(days: u64) -> i64 {
    i64::try_from(days)
        .unwrap_or(i64::MAX)
        .saturating_mul(24 * 60 * 60 * 1000)
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| parse_u64(&v))
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}
