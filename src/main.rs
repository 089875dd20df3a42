// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use odm::logging;
use odm::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "odm", version, about = "Priority download queue with a bounded worker pool")]
struct Cli {
    /// TOML config file. Environment overrides still apply.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Priority for the URLs given on the command line (lower runs first).
    #[arg(short, long, default_value_t = DEFAULT_PRIORITY, allow_negative_numbers = true)]
    priority: i32,

    /// Caption attached to the URLs given on the command line.
    #[arg(long, default_value = "")]
    caption: String,

    /// Override the configured worker count.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Override the configured bandwidth limit (bytes/s, 0 = unlimited).
    #[arg(long)]
    bandwidth_limit: Option<u64>,

    /// Keep serving until Ctrl-C instead of exiting once the queue drains.
    #[arg(long)]
    keep_running: bool,

    urls: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(workers) = cli.workers {
        config.max_workers = workers;
    }
    if let Some(limit) = cli.bandwidth_limit {
        config.bandwidth_limit = limit;
    }
    let _log_guard = logging::init_logging(&config.log_dir, &config.log_level);

    // Malformed input stops here and never reaches the queue.
    for url in &cli.urls {
        url::Url::parse(url).with_context(|| format!("invalid url: {url}"))?;
    }

    let manager = DownloadManager::new(config.manager_config(), Arc::new(LogNotifier)).await?;
    let store = QueueStore::new(&config.store_path)
        .await
        .with_context(|| format!("opening queue store {}", config.store_path.display()))?;
    store.restore_into(&manager).await?;

    for url in cli.urls {
        manager.enqueue(url, cli.caption.clone(), cli.priority).await;
    }

    if cli.keep_running {
        tokio::signal::ctrl_c().await?;
        tracing::info!("interrupt received");
    } else {
        tokio::select! {
            _ = manager.wait_idle() => {}
            res = tokio::signal::ctrl_c() => {
                res?;
                tracing::info!("interrupt received");
            }
        }
    }

    // Freeze the queue so the saved list matches what is left behind.
    manager.pause().await;
    let saved = store.snapshot_from(&manager).await?;
    tracing::info!(saved, "pending downloads persisted");
    manager.shutdown().await;

    let status = manager.status().await;
    let failed = manager.list_failed().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "status": status,
            "completed": manager.list_completed().await,
            "failed": failed,
        }))?
    );

    Ok(())
}
