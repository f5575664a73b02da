use anyhow::{Context, Result, bail};
use fieldsync_lib::domain::value_objects::KeyRange;
use fieldsync_lib::infrastructure::fallback::QuotaKeyValueStore;
use fieldsync_lib::shared::config::DatabaseConfig;
use fieldsync_lib::{
    AppConfig, HousekeepingJob, LocalStore, StoreHandle, SyncQueue, SystemClock,
};
use serde::Serialize;
use std::env;
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Stats,
    ClearQuarantined,
    Cleanup,
}

#[derive(Debug, Clone)]
struct CliOptions {
    command: Command,
    pretty: bool,
    database_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatsReport<'a> {
    database_url: &'a str,
    drafts: usize,
    queue: fieldsync_lib::QueueStats,
}

#[derive(Debug, Serialize)]
struct ClearReport<'a> {
    database_url: &'a str,
    removed: u64,
}

fn usage() -> &'static str {
    "Usage: offline_queue_admin <stats|clear-quarantined|cleanup> [--pretty] [--database-url <url>]"
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let options = parse_args(args)?;
    let mut config = AppConfig::from_env();
    if let Some(url) = &options.database_url {
        config.database.url = url.clone();
    }

    let rt = Runtime::new().context("Failed to create Tokio runtime")?;
    let payload = rt.block_on(async {
        run(&options, &config)
            .await
            .with_context(|| format!("Failed to run against {}", config.database.url))
    })?;
    println!("{payload}");
    Ok(())
}

async fn run(options: &CliOptions, config: &AppConfig) -> Result<String> {
    let handle = StoreHandle::new(&DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: 1,
    });
    let store = handle.open().await?;
    let clock = Arc::new(SystemClock);

    let payload = match options.command {
        Command::Stats => {
            let queue = SyncQueue::new(store.clone(), clock, &config.sync);
            let report = StatsReport {
                database_url: &config.database.url,
                drafts: store.drafts_by_updated_at(KeyRange::all()).await?.len(),
                queue: queue.get_stats().await?,
            };
            to_json(&report, options.pretty)?
        }
        Command::ClearQuarantined => {
            let queue = SyncQueue::new(store.clone(), clock, &config.sync);
            let report = ClearReport {
                database_url: &config.database.url,
                removed: queue.clear_quarantined().await?,
            };
            to_json(&report, options.pretty)?
        }
        Command::Cleanup => {
            let fallback = Arc::new(match config.fallback_file_path() {
                Some(path) => QuotaKeyValueStore::open(path, config.storage.fallback_quota_bytes)?,
                None => QuotaKeyValueStore::in_memory(config.storage.fallback_quota_bytes),
            });
            let job = HousekeepingJob::new(
                store.clone(),
                fallback,
                clock,
                None,
                config.retention.draft_retention_ms(),
            );
            to_json(&job.run_once().await?, options.pretty)?
        }
    };

    handle.close().await;
    Ok(payload)
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(serde_json::to_string(value)?)
    }
}

fn parse_args<I>(args: I) -> Result<CliOptions>
where
    I: IntoIterator<Item = String>,
{
    let mut command: Option<Command> = None;
    let mut pretty = false;
    let mut database_url: Option<String> = None;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--pretty" => {
                pretty = true;
            }
            "--database-url" => {
                let value = iter.next().ok_or_else(|| {
                    anyhow::anyhow!("--database-url requires a value\n{}", usage())
                })?;
                database_url = Some(value);
            }
            "-h" | "--help" => {
                println!("{}", usage());
                std::process::exit(0);
            }
            other if command.is_none() && !other.starts_with('-') => {
                command = Some(parse_command(other)?);
            }
            other => {
                bail!("Unknown argument: {other}\n{}", usage());
            }
        }
    }

    let Some(command) = command else {
        bail!("Missing command\n{}", usage());
    };
    Ok(CliOptions {
        command,
        pretty,
        database_url,
    })
}

fn parse_command(value: &str) -> Result<Command> {
    match value.to_ascii_lowercase().as_str() {
        "stats" => Ok(Command::Stats),
        "clear-quarantined" => Ok(Command::ClearQuarantined),
        "cleanup" => Ok(Command::Cleanup),
        other => bail!("Unknown command: {other}. Expected 'stats', 'clear-quarantined' or 'cleanup'."),
    }
}
