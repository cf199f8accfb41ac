use async_trait::async_trait;

use super::schema::Database;
use super::types::{Article, Feed, StoreError};

/// The capability set the refresher and the read path need from a feed cache.
///
/// [`Database`] is the SQLite implementation. Callers hold an
/// `Arc<dyn Store>` so another backend can be swapped in at startup.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update an article keyed by its link, stamping `source` with
    /// `feed_url` and `fetched_at` with the current time.
    async fn upsert_article(&self, article: &Article, feed_url: &str) -> Result<(), StoreError>;

    /// Every cached article; undecodable rows are skipped.
    async fn list_articles(&self) -> Result<Vec<Article>, StoreError>;

    /// Register a feed; returns `false` if the URL was already registered.
    async fn add_feed(&self, url: &str, name: &str) -> Result<bool, StoreError>;

    /// Deregister a feed and its articles; returns the number of articles removed.
    async fn remove_feed(&self, url: &str) -> Result<u64, StoreError>;

    async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError>;

    async fn mark_read(&self, link: &str) -> Result<(), StoreError>;

    async fn mark_unread(&self, link: &str) -> Result<(), StoreError>;

    async fn list_read(&self) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
impl Store for Database {
    async fn upsert_article(&self, article: &Article, feed_url: &str) -> Result<(), StoreError> {
        Database::upsert_article(self, article, feed_url).await
    }

    async fn list_articles(&self) -> Result<Vec<Article>, StoreError> {
        Database::list_articles(self).await
    }

    async fn add_feed(&self, url: &str, name: &str) -> Result<bool, StoreError> {
        Database::add_feed(self, url, name).await
    }

    async fn remove_feed(&self, url: &str) -> Result<u64, StoreError> {
        Database::remove_feed(self, url).await
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        Database::list_feeds(self).await
    }

    async fn mark_read(&self, link: &str) -> Result<(), StoreError> {
        Database::mark_read(self, link).await
    }

    async fn mark_unread(&self, link: &str) -> Result<(), StoreError> {
        Database::mark_unread(self, link).await
    }

    async fn list_read(&self) -> Result<Vec<String>, StoreError> {
        Database::list_read(self).await
    }
}
