use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use feedcache::api::{ArticlesResponse, RefreshReport};
use feedcache::config::Config;
use feedcache::feed::Fetcher;
use feedcache::refresh::{FeedReport, RefreshSummary, Refresher};
use feedcache::storage::{Database, Store, StoreError};

/// Get the config directory path (~/.config/feedcache/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedcache"))
}

/// Create the config directory if needed, readable by the owner only.
fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(dir, perms) {
                    tracing::warn!(path = %dir.display(), error = %e, "Failed to set directory permissions to 0700");
                }
            }
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to read directory metadata");
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to encode JSON output")?
    );
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "feedcache",
    version,
    about = "Fetches RSS/Atom feeds and serves cached articles as JSON"
)]
struct Args {
    /// Config file (default: ~/.config/feedcache/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// SQLite cache file, overriding the config
    #[arg(long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a feed
    Add {
        url: String,
        /// Display name (default: the feed's declared title)
        #[arg(long)]
        name: Option<String>,
    },
    /// Deregister a feed and drop its cached articles
    Remove { url: String },
    /// List registered feeds
    Feeds,
    /// Fetch feeds now and update the cache
    Refresh {
        /// Refresh only this feed URL
        url: Option<String>,
    },
    /// List cached articles
    Articles,
    /// Mark an article as read
    Read { link: String },
    /// Clear an article's read marker
    Unread { link: String },
    /// List links marked as read
    ReadList,
    /// Refresh on a schedule until Ctrl+C
    Watch {
        /// Minutes between refreshes (default: from config)
        #[arg(long, value_name = "MINUTES")]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feedcache=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match &args.database {
        Some(path) => path.clone(),
        None => {
            ensure_private_dir(&config_dir)?;
            config.database_path_in(&config_dir)
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::Locked) => {
            eprintln!(
                "Error: The feed cache at {} is locked by another process. Please close it and try again.",
                db_path.display()
            );
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to open feed cache"),
    };

    let fetcher = Fetcher::new(&config.user_agent, config.request_timeout())
        .context("Failed to build HTTP client")?;
    let refresher = Refresher::new(Arc::new(db), fetcher)
        .with_concurrency(config.max_concurrent_refreshes)
        .with_title_timeout(config.title_timeout());
    let store = refresher.store().clone();

    match args.command {
        Command::Add { url, name } => {
            let feed = refresher
                .register_feed(&url, name.as_deref())
                .await
                .with_context(|| format!("Failed to register {}", url))?;
            print_json(&feed)?;
        }
        Command::Remove { url } => {
            let removed = refresher
                .deregister_feed(&url)
                .await
                .with_context(|| format!("Failed to remove {}", url))?;
            print_json(&serde_json::json!({ "url": url, "articles_removed": removed }))?;
        }
        Command::Feeds => {
            let feeds = store.list_feeds().await.context("Failed to list feeds")?;
            print_json(&feeds)?;
        }
        Command::Refresh { url: Some(url) } => {
            let outcome = refresher.refresh_feed(url.trim()).await;
            let summary = RefreshSummary {
                feeds: vec![FeedReport { url, outcome }],
            };
            print_json(&RefreshReport::from(&summary))?;
        }
        Command::Refresh { url: None } => {
            let summary = refresher
                .refresh_all()
                .await
                .context("Failed to read registered feeds")?;
            print_json(&RefreshReport::from(&summary))?;
        }
        Command::Articles => {
            let articles = store
                .list_articles()
                .await
                .context("Failed to list articles")?;
            print_json(&ArticlesResponse::cached(articles))?;
        }
        Command::Read { link } => {
            store
                .mark_read(&link)
                .await
                .with_context(|| format!("Failed to mark {} as read", link))?;
        }
        Command::Unread { link } => {
            store
                .mark_unread(&link)
                .await
                .with_context(|| format!("Failed to mark {} as unread", link))?;
        }
        Command::ReadList => {
            let links = store.list_read().await.context("Failed to list read links")?;
            print_json(&links)?;
        }
        Command::Watch { interval } => {
            let interval = match interval {
                Some(0) => anyhow::bail!("--interval must be greater than 0"),
                Some(minutes) => Duration::from_secs(minutes.saturating_mul(60)),
                None => config.refresh_interval(),
            };
            tracing::info!(interval_secs = interval.as_secs(), "Watching feeds, Ctrl+C to stop");

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            };
            let cycles = refresher.run_scheduled(interval, shutdown).await;
            eprintln!("Stopped after {} refresh cycles.", cycles);
        }
    }

    Ok(())
}
