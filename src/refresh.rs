//! Refresh orchestration: registered feeds in, cached articles out.
//!
//! For every feed the pipeline runs Fetcher → Parser → Store. A feed that
//! cannot be fetched or parsed is logged and skipped; an article that cannot
//! be stored is logged and skipped. Nothing here aborts a whole cycle except
//! failing to read the feed list itself.

use futures::stream::{self, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;

use crate::feed::{parse_feed, resolve_feed_title, FetchError, Fetcher};
use crate::storage::{Feed, Store, StoreError};
use crate::util::{validate_feed_url, UrlValidationError};

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_TITLE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error(transparent)]
    InvalidUrl(#[from] UrlValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The feed was deregistered by someone else between insert and lookup
    #[error("Feed {0} disappeared during registration")]
    Vanished(String),
}

// ============================================================================
// Outcomes
// ============================================================================

/// Where a feed is in one refresh.
///
/// `Idle → Fetching → Parsing → Storing → Done`, or `Skipped` from
/// `Fetching`/`Parsing` once the attempt budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    Fetching,
    Parsing,
    Storing,
    Done,
    Skipped,
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeedState::Idle => "idle",
            FeedState::Fetching => "fetching",
            FeedState::Parsing => "parsing",
            FeedState::Storing => "storing",
            FeedState::Done => "done",
            FeedState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

fn enter(url: &str, state: FeedState) {
    tracing::debug!(feed = %url, state = %state, "Feed state");
}

/// Result of refreshing one feed.
#[derive(Debug)]
pub enum FeedOutcome {
    /// Articles were parsed; `failed` of them could not be stored.
    Done { stored: usize, failed: usize },
    /// Fetch or parse failed on every attempt; nothing was stored.
    Skipped(FetchError),
}

impl FeedOutcome {
    pub fn state(&self) -> FeedState {
        match self {
            FeedOutcome::Done { .. } => FeedState::Done,
            FeedOutcome::Skipped(_) => FeedState::Skipped,
        }
    }
}

#[derive(Debug)]
pub struct FeedReport {
    pub url: String,
    pub outcome: FeedOutcome,
}

/// Per-feed outcomes of one `refresh_all`, in registration order.
#[derive(Debug, Default)]
pub struct RefreshSummary {
    pub feeds: Vec<FeedReport>,
}

impl RefreshSummary {
    pub fn stored(&self) -> usize {
        self.feeds
            .iter()
            .map(|r| match r.outcome {
                FeedOutcome::Done { stored, .. } => stored,
                FeedOutcome::Skipped(_) => 0,
            })
            .sum()
    }

    pub fn skipped(&self) -> usize {
        self.feeds
            .iter()
            .filter(|r| matches!(r.outcome, FeedOutcome::Skipped(_)))
            .count()
    }
}

// ============================================================================
// Refresher
// ============================================================================

/// Drives the pipeline over the registered feeds.
///
/// Holds the shared store handle and the fetcher; cloning is cheap.
#[derive(Clone)]
pub struct Refresher {
    store: Arc<dyn Store>,
    fetcher: Fetcher,
    concurrency: usize,
    title_timeout: Duration,
}

impl Refresher {
    pub fn new(store: Arc<dyn Store>, fetcher: Fetcher) -> Self {
        Self {
            store,
            fetcher,
            concurrency: DEFAULT_CONCURRENCY,
            title_timeout: DEFAULT_TITLE_TIMEOUT,
        }
    }

    /// Maximum feeds refreshed at once (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_title_timeout(mut self, timeout: Duration) -> Self {
        self.title_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Fetch, parse and store one feed.
    ///
    /// Every article is written with `source = url`, whatever title the feed
    /// declares. Articles that fail to store are counted and skipped.
    pub async fn refresh_feed(&self, url: &str) -> FeedOutcome {
        enter(url, FeedState::Fetching);
        let parsed = self
            .fetcher
            .fetch_with(url, |bytes| {
                enter(url, FeedState::Parsing);
                Ok(parse_feed(&bytes)?)
            })
            .await;

        let articles = match parsed {
            Ok(articles) => articles,
            Err(e) => {
                tracing::warn!(feed = %url, error = %e, "Feed skipped");
                enter(url, FeedState::Skipped);
                return FeedOutcome::Skipped(e);
            }
        };

        enter(url, FeedState::Storing);
        let mut stored = 0;
        let mut failed = 0;
        for mut article in articles {
            article.source = url.to_string();
            match self.store.upsert_article(&article, url).await {
                Ok(()) => stored += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        feed = %url,
                        link = %article.link,
                        error = %e,
                        "Failed to store article, skipping"
                    );
                }
            }
        }

        enter(url, FeedState::Done);
        tracing::info!(feed = %url, stored = stored, failed = failed, "Feed refreshed");
        FeedOutcome::Done { stored, failed }
    }

    /// Refresh every registered feed through a bounded worker pool.
    ///
    /// One failing feed never affects the others. Each feed is attempted once
    /// per call (the fetcher's own retries aside).
    ///
    /// # Errors
    ///
    /// Only if the feed list cannot be read.
    pub async fn refresh_all(&self) -> Result<RefreshSummary, StoreError> {
        let feeds = self.store.list_feeds().await?;
        let total = feeds.len();
        tracing::info!(feeds = total, workers = self.concurrency, "Refresh cycle started");
        for feed in &feeds {
            enter(&feed.url, FeedState::Idle);
        }

        let mut reports: Vec<(usize, FeedReport)> = stream::iter(feeds.into_iter().enumerate())
            .map(move |(index, feed)| async move {
                let outcome = self.refresh_feed(&feed.url).await;
                (
                    index,
                    FeedReport {
                        url: feed.url,
                        outcome,
                    },
                )
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        reports.sort_by_key(|(index, _)| *index);

        let summary = RefreshSummary {
            feeds: reports.into_iter().map(|(_, report)| report).collect(),
        };
        tracing::info!(
            feeds = total,
            skipped = summary.skipped(),
            stored = summary.stored(),
            "Refresh cycle complete"
        );
        Ok(summary)
    }

    /// Register a feed and return its stored row.
    ///
    /// A blank or missing `name` is resolved from the feed's declared title
    /// (one request bounded by the title timeout), falling back to the URL.
    /// Registering a known URL returns the existing row unchanged and makes
    /// no request.
    pub async fn register_feed(&self, url: &str, name: Option<&str>) -> Result<Feed, RegisterError> {
        let url = url.trim();
        validate_feed_url(url)?;

        if let Some(existing) = self.find_feed(url).await? {
            tracing::debug!(feed = %url, "Feed already registered");
            return Ok(existing);
        }

        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => resolve_feed_title(self.fetcher.client(), url, self.title_timeout).await,
        };

        if self.store.add_feed(url, &name).await? {
            tracing::info!(feed = %url, name = %name, "Feed registered");
        }

        self.find_feed(url)
            .await?
            .ok_or_else(|| RegisterError::Vanished(url.to_string()))
    }

    /// Remove a feed and its cached articles; returns the number of articles removed.
    pub async fn deregister_feed(&self, url: &str) -> Result<u64, StoreError> {
        let removed = self.store.remove_feed(url.trim()).await?;
        tracing::info!(feed = %url, articles = removed, "Feed deregistered");
        Ok(removed)
    }

    /// Run `refresh_all` every `interval` until `shutdown` resolves.
    ///
    /// The first cycle starts immediately. A cycle in progress is finished
    /// before shutdown is observed. Returns the number of completed cycles.
    pub async fn run_scheduled<F>(&self, interval: Duration, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut cycles = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(cycles = cycles, "Scheduled refresh stopped");
                    return cycles;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_all().await {
                        tracing::warn!(error = %e, "Refresh cycle failed");
                    }
                    cycles += 1;
                }
            }
        }
    }

    async fn find_feed(&self, url: &str) -> Result<Option<Feed>, StoreError> {
        Ok(self
            .store
            .list_feeds()
            .await?
            .into_iter()
            .find(|f| f.url == url))
    }
}
